use super::setup;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wasmtime_bind::*;

#[derive(Debug)]
struct Marker(Box<u32>);

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "marker {}", self.0)
    }
}

impl std::error::Error for Marker {}

fn trap_code(wat: &str, name: &str) -> Result<Option<TrapCode>> {
    let (mut cx, module) = setup(&Config::new(), wat)?;
    let instance = cx.instantiate(&module)?;
    let func = instance.get_func(&mut cx, name)?.unwrap();
    let err = func.call(&mut cx, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GuestFault, "{err}");
    assert!(!err.frames().is_empty());
    Ok(err.trap_code())
}

#[test]
fn guest_faults() -> Result<()> {
    assert_eq!(
        trap_code(r#"(module (func (export "f") unreachable))"#, "f")?,
        Some(TrapCode::UnreachableCodeReached)
    );
    assert_eq!(
        trap_code(
            r#"(module (func (export "f") (result i32)
                i32.const 1
                i32.const 0
                i32.div_s))"#,
            "f"
        )?,
        Some(TrapCode::IntegerDivisionByZero)
    );
    assert_eq!(
        trap_code(
            r#"(module
                (type $t (func))
                (table 1 funcref)
                (func (export "f")
                    i32.const 0
                    call_indirect (type $t)))"#,
            "f"
        )?,
        Some(TrapCode::IndirectCallToNull)
    );
    Ok(())
}

#[test]
fn frames_name_the_guest_functions() -> Result<()> {
    let (mut cx, module) = setup(
        &Config::new(),
        r#"
            (module $m
                (func $outer (export "run") call $inner)
                (func $inner unreachable))
        "#,
    )?;
    let instance = cx.instantiate(&module)?;
    let run = instance.get_func(&mut cx, "run")?.unwrap();
    let err = run.call(&mut cx, &[]).unwrap_err();
    let names: Vec<_> = err.frames().iter().map(|f| f.func_name()).collect();
    assert_eq!(names, [Some("inner"), Some("outer")]);
    assert_eq!(err.frames()[0].func_index(), 1);
    assert_eq!(err.frames()[0].module_name(), Some("m"));
    assert_eq!(err.frames()[0].to_string(), "m!inner");
    Ok(())
}

#[test]
fn backtraces_can_be_turned_off() -> Result<()> {
    let (mut cx, module) = setup(
        Config::new().wasm_backtrace(false),
        r#"(module (func (export "f") unreachable))"#,
    )?;
    let instance = cx.instantiate(&module)?;
    let f = instance.get_func(&mut cx, "f")?.unwrap();
    let err = f.call(&mut cx, &[]).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::UnreachableCodeReached));
    assert!(err.frames().is_empty());
    Ok(())
}

const NESTED: &str = r#"
    (module
        (import "host" "outer" (func $outer (param funcref)))
        (import "host" "fail" (func $fail))
        (func $inner call $fail)
        (func $crash unreachable)
        (elem declare func $inner $crash)
        (func (export "run") (param i32)
            local.get 0
            if
                ref.func $crash
                call $outer
            else
                ref.func $inner
                call $outer
            end))
"#;

/// Calls `run`, where `host::outer` calls back into the guest, which calls
/// `host::fail` that fails with a [`Marker`].
fn nested(arg: i32) -> Result<(Error, usize)> {
    let (mut cx, module) = setup(&Config::new(), NESTED)?;
    let outer = Func::wrap(&mut cx, |caller: &mut HostCaller<'_>, f: Func| {
        f.call(caller, &[])?;
        Ok(())
    })?;
    let addr = Arc::new(AtomicUsize::new(0));
    let fail = {
        let addr = addr.clone();
        Func::wrap(&mut cx, move |_: &mut HostCaller<'_>, ()| -> anyhow::Result<()> {
            let marker = Marker(Box::new(7));
            addr.store(&*marker.0 as *const u32 as usize, Ordering::SeqCst);
            Err(marker.into())
        })?
    };
    cx.define("host", "outer", outer)?;
    cx.define("host", "fail", fail)?;
    let instance = cx.instantiate(&module)?;
    let run = instance.get_func(&mut cx, "run")?.unwrap();
    let err = run.call(&mut cx, &[Value::I32(arg)]).unwrap_err();
    Ok((err, addr.load(Ordering::SeqCst)))
}

#[test]
fn host_causes_cross_nested_boundaries_intact() -> Result<()> {
    let (err, addr) = nested(0)?;
    assert_eq!(err.kind(), ErrorKind::HostCause, "{err:?}");
    let Error::Host(failure) = &err else {
        panic!("expected a host failure, got {err:?}");
    };
    assert_eq!(failure.function(), Some("host::fail"));
    assert!(!failure.frames().is_empty());

    let marker = err.host_cause().unwrap().downcast_ref::<Marker>().unwrap();
    assert_eq!(*marker.0, 7);
    assert_eq!(&*marker.0 as *const u32 as usize, addr);

    let source = std::error::Error::source(&err).unwrap();
    assert_eq!(source.to_string(), "marker 7");
    Ok(())
}

#[test]
fn guest_faults_cross_host_frames_unchanged() -> Result<()> {
    let (err, _) = nested(1)?;
    assert_eq!(err.kind(), ErrorKind::GuestFault, "{err:?}");
    assert_eq!(err.trap_code(), Some(TrapCode::UnreachableCodeReached));
    assert!(err.host_cause().is_none());
    Ok(())
}

#[test]
fn misuse_inside_a_callback_is_the_callback_failing() -> Result<()> {
    let (mut cx, module) = setup(
        &Config::new(),
        r#"
        (module
            (import "host" "peek" (func $peek (param externref)))
            (import "host" "poke" (func $poke))
            (func (export "peek") (param externref)
                local.get 0
                call $peek)
            (func (export "poke") call $poke))
        "#,
    )?;
    let peek = Func::wrap(&mut cx, |caller: &mut HostCaller<'_>, obj: ObjectRef| {
        obj.downcast::<String>(&*caller)?;
        Ok(())
    })?;
    let constant = Global::new(&mut cx, ValueKind::I32, false, Value::I32(1))?;
    let poke = Func::wrap(&mut cx, move |caller: &mut HostCaller<'_>, ()| {
        constant.set(&mut *caller, Value::I32(2))?;
        Ok(())
    })?;
    cx.define("host", "peek", peek)?;
    cx.define("host", "poke", poke)?;
    let instance = cx.instantiate(&module)?;

    let obj = ObjectRef::new(&mut cx, 3u32)?;
    let err = instance
        .get_func(&mut cx, "peek")?
        .unwrap()
        .call(&mut cx, &[Value::from(obj)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostCause, "{err:?}");
    let Error::Host(failure) = &err else {
        panic!("expected a host failure, got {err:?}");
    };
    assert_eq!(failure.function(), Some("host::peek"));
    assert!(matches!(
        err.host_cause().unwrap().downcast_ref::<Error>(),
        Some(Error::Usage(UsageError::ObjectType(_)))
    ));

    let err = instance
        .get_func(&mut cx, "poke")?
        .unwrap()
        .call(&mut cx, &[])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostCause, "{err:?}");
    assert!(matches!(
        err.host_cause().unwrap().downcast_ref::<Error>(),
        Some(Error::Usage(UsageError::ImmutableGlobal))
    ));
    Ok(())
}

#[test]
fn host_failures_surface_at_the_top_level() -> Result<()> {
    let (mut cx, _) = setup(&Config::new(), "(module)")?;
    let f = Func::wrap(&mut cx, |_: &mut HostCaller<'_>, ()| -> anyhow::Result<()> {
        anyhow::bail!("nope")
    })?;
    let err = f.call(&mut cx, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostCause);
    assert_eq!(err.host_cause().unwrap().to_string(), "nope");
    Ok(())
}

#[test]
fn start_function_traps() -> Result<()> {
    let (mut cx, module) = setup(
        &Config::new(),
        r#"(module (func $start unreachable) (start $start))"#,
    )?;
    let err = cx.instantiate(&module).unwrap_err();
    assert_eq!(err.trap_code(), Some(TrapCode::UnreachableCodeReached));
    Ok(())
}
