use super::setup;
use wasmtime_bind::*;

const ARITH: &str = r#"
    (module
        (import "host" "pair" (func $pair (param i32) (result i32 i64)))
        (func (export "add") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.add)
        (func (export "sum_pair") (param i32) (result i64)
            local.get 0
            call $pair
            local.get 0
            i64.extend_i32_s
            i64.add
            drop
            i64.extend_i32_s))
"#;

fn arith() -> Result<(Context, Instance)> {
    let (mut cx, module) = setup(&Config::new(), ARITH)?;
    let pair = Func::wrap(&mut cx, |_: &mut HostCaller<'_>, x: i32| {
        Ok((x + 1, i64::from(x) * 10))
    })?;
    cx.define("host", "pair", pair)?;
    let instance = cx.instantiate(&module)?;
    Ok((cx, instance))
}

#[test]
fn call_exports_with_boxed_arguments() -> Result<()> {
    let (mut cx, instance) = arith()?;
    let add = instance.get_func(&mut cx, "add")?.unwrap();
    assert_eq!(
        add.ty(&cx)?,
        Signature::new([ValueKind::I64, ValueKind::I64], [ValueKind::I64])
    );
    assert_eq!(
        add.call(&mut cx, &[Value::I64(40), Value::I64(2)])?,
        [Value::I64(42)]
    );
    // i32 arguments widen to i64 parameters
    assert_eq!(
        add.call(&mut cx, &[Value::I32(-1), Value::I64(2)])?,
        [Value::I64(1)]
    );
    Ok(())
}

#[test]
fn host_functions_with_several_results() -> Result<()> {
    let (mut cx, instance) = arith()?;
    let sum_pair = instance.get_func(&mut cx, "sum_pair")?.unwrap();
    assert_eq!(sum_pair.call(&mut cx, &[Value::I32(4)])?, [Value::I64(5)]);
    Ok(())
}

#[test]
fn bad_arguments() -> Result<()> {
    let (mut cx, instance) = arith()?;
    let add = instance.get_func(&mut cx, "add")?.unwrap();

    let err = add.call(&mut cx, &[Value::I64(1)]).unwrap_err();
    assert!(
        matches!(
            err,
            Error::ArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ),
        "{err}"
    );

    let err = add
        .call(&mut cx, &[Value::I64(1), Value::from(1.0f64)])
        .unwrap_err();
    match err {
        Error::TypeMismatch {
            position,
            expected,
            found,
            ..
        } => {
            assert_eq!(position, Position::Param(1));
            assert_eq!(expected, ValueKind::I64);
            assert_eq!(found, ValueKind::F64);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn missing_exports() -> Result<()> {
    let (mut cx, instance) = arith()?;
    assert!(instance.get_func(&mut cx, "nope")?.is_none());
    assert!(instance.get_global(&mut cx, "add")?.is_none());
    Ok(())
}

#[test]
fn use_after_dispose() -> Result<()> {
    let (mut cx, instance) = arith()?;
    let add = instance.get_func(&mut cx, "add")?.unwrap();
    cx.dispose();

    let err = add.call(&mut cx, &[Value::I64(1), Value::I64(2)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisposedResource);
    assert!(matches!(instance.get_func(&mut cx, "add"), Err(Error::Disposed(_))));
    assert!(matches!(
        Func::wrap(&mut cx, |_: &mut HostCaller<'_>, ()| Ok(())),
        Err(Error::Disposed("context"))
    ));
    Ok(())
}

#[test]
fn functions_belong_to_one_context() -> Result<()> {
    let (mut a, instance) = arith()?;
    let (mut b, _) = arith()?;
    let add = instance.get_func(&mut a, "add")?.unwrap();

    let err = add.call(&mut b, &[Value::I64(1), Value::I64(2)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(UsageError::WrongContext("function"))
    ));

    drop(a);
    let err = add.call(&mut b, &[Value::I64(1), Value::I64(2)]).unwrap_err();
    assert!(matches!(err, Error::Disposed("function")));
    Ok(())
}

#[test]
fn exports_are_deduplicated() -> Result<()> {
    let (mut cx, instance) = arith()?;
    let a = instance.get_func(&mut cx, "add")?.unwrap();
    let b = instance.get_func(&mut cx, "add")?.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, instance.get_func(&mut cx, "sum_pair")?.unwrap());
    Ok(())
}

#[test]
fn host_callbacks_can_reenter() -> Result<()> {
    let (mut cx, module) = setup(
        &Config::new(),
        r#"
            (module
                (import "host" "twice" (func $twice (param funcref i32) (result i32)))
                (func $inc (param i32) (result i32)
                    local.get 0
                    i32.const 1
                    i32.add)
                (elem declare func $inc)
                (func (export "run") (param i32) (result i32)
                    ref.func $inc
                    local.get 0
                    call $twice))
        "#,
    )?;
    let twice = Func::wrap(
        &mut cx,
        |caller: &mut HostCaller<'_>, (f, x): (Func, i32)| {
            let once = f.typed::<i32, i32>(&mut *caller)?.unwrap();
            let y = once.call(&mut *caller, x)?;
            Ok(once.call(&mut *caller, y)?)
        },
    )?;
    cx.define("host", "twice", twice)?;
    let instance = cx.instantiate(&module)?;
    let run = instance.get_func(&mut cx, "run")?.unwrap();
    assert_eq!(run.call(&mut cx, &[Value::I32(5)])?, [Value::I32(7)]);
    Ok(())
}
