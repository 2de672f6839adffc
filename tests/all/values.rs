use super::setup;
use wasmtime_bind::*;

const WAT: &str = r#"
    (module
        (func (export "id_v128") (param v128) (result v128) local.get 0)
        (func (export "id_f32") (param f32) (result f32) local.get 0)
        (func (export "id_externref") (param externref) (result externref) local.get 0)
        (func (export "is_null") (param externref) (result i32)
            local.get 0
            ref.is_null))
"#;

fn instance() -> Result<(Context, Instance)> {
    let (mut cx, module) = setup(&Config::new(), WAT)?;
    let instance = cx.instantiate(&module)?;
    Ok((cx, instance))
}

#[test]
fn vectors_round_trip_through_guest_code() -> Result<()> {
    let (mut cx, instance) = instance()?;
    let id = instance.get_func(&mut cx, "id_v128")?.unwrap();
    let bytes: Vec<u8> = (1..=16).collect();
    let v = Value::v128_from_bytes(&bytes)?;
    let out = id.call(&mut cx, &[v])?;
    assert_eq!(out, [v]);
    assert_eq!(out[0].as_v128()?.to_bytes().as_slice(), bytes.as_slice());

    assert!(matches!(
        Value::v128_from_bytes(&bytes[..15]),
        Err(Error::LengthMismatch {
            expected: 16,
            found: 15
        })
    ));
    Ok(())
}

#[test]
fn nan_payloads_survive() -> Result<()> {
    let (mut cx, instance) = instance()?;
    let id = instance.get_func(&mut cx, "id_f32")?.unwrap();
    let nan = Value::F32(0x7fc0_1234);
    assert_eq!(id.call(&mut cx, &[nan])?, [nan]);
    Ok(())
}

#[test]
fn host_objects_round_trip() -> Result<()> {
    let (mut cx, instance) = instance()?;
    let id = instance.get_func(&mut cx, "id_externref")?.unwrap();
    let is_null = instance
        .get_func(&mut cx, "is_null")?
        .unwrap()
        .typed::<Option<ObjectRef>, i32>(&mut cx)?
        .unwrap();

    let obj = ObjectRef::new(&mut cx, String::from("hello"))?;
    let out = id.call(&mut cx, &[Value::from(obj)])?;
    assert_eq!(out, [Value::ExternRef(Some(obj))]);
    let back = out[0].as_extern_ref()?.unwrap();
    assert_eq!(back.downcast::<String>(&cx)?.as_str(), "hello");
    assert!(matches!(
        back.downcast::<u32>(&cx),
        Err(Error::Usage(UsageError::ObjectType(_)))
    ));

    assert_eq!(is_null.call(&mut cx, Some(obj))?, 0);
    assert_eq!(is_null.call(&mut cx, None)?, 1);

    obj.release(&mut cx)?;
    assert!(matches!(
        id.call(&mut cx, &[Value::from(obj)]),
        Err(Error::Disposed("host object"))
    ));
    assert!(matches!(obj.data(&cx), Err(Error::Disposed(_))));
    Ok(())
}

#[test]
fn repeated_externref_calls_do_not_accumulate_roots() -> Result<()> {
    let (mut cx, instance) = instance()?;
    let id = instance.get_func(&mut cx, "id_externref")?.unwrap();
    let typed = id
        .typed::<Option<ObjectRef>, Option<ObjectRef>>(&mut cx)?
        .unwrap();
    let obj = ObjectRef::new(&mut cx, 7u64)?;

    for i in 0..100_000 {
        if i % 2 == 0 {
            assert_eq!(id.call(&mut cx, &[Value::from(obj)])?, [Value::ExternRef(Some(obj))]);
        } else {
            assert_eq!(typed.call(&mut cx, Some(obj))?, Some(obj));
        }
    }
    assert_eq!(*obj.downcast::<u64>(&cx)?, 7);
    Ok(())
}

#[test]
fn repeated_externref_stores_do_not_accumulate_roots() -> Result<()> {
    let (mut cx, _) = instance()?;
    let obj = ObjectRef::new(&mut cx, 7u64)?;
    let table = Table::new(&mut cx, ValueKind::ExternRef, 1, None, Value::NULL_EXTERN_REF)?;
    let global = Global::new(&mut cx, ValueKind::ExternRef, true, Value::from(obj))?;

    for _ in 0..100_000 {
        table.set(&mut cx, 0, Value::from(obj))?;
        global.set(&mut cx, Value::from(obj))?;
    }
    assert_eq!(table.get(&mut cx, 0)?, Value::ExternRef(Some(obj)));
    assert_eq!(global.get(&mut cx)?, Value::ExternRef(Some(obj)));
    Ok(())
}

#[test]
fn accessors_promote_but_never_narrow() -> Result<()> {
    let v = Value::from(7i32);
    assert_eq!(v.as_i64()?, 7);
    assert_eq!(v.as_f64()?, 7.0);
    assert_eq!(v.get::<f32>()?, 7.0);

    let err = Value::from(7i64).as_i32().unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidCast {
            from: ValueKind::I64,
            to: ValueKind::I32
        }
    ));
    assert!(Value::from(1.0f64).as_f32().is_err());
    assert!(Value::NULL_FUNC_REF.as_extern_ref().is_err());
    Ok(())
}

#[test]
fn null_references_are_typed() -> Result<()> {
    assert_eq!(Value::NULL_FUNC_REF.kind(), ValueKind::FuncRef);
    assert_eq!(Value::NULL_EXTERN_REF.kind(), ValueKind::ExternRef);
    assert!(Value::NULL_EXTERN_REF.is_null());
    assert_eq!(Value::NULL_EXTERN_REF.as_extern_ref()?, None);
    assert!(matches!(
        Value::NULL_FUNC_REF.get::<Func>(),
        Err(Error::NullReference(ValueKind::FuncRef))
    ));
    Ok(())
}
