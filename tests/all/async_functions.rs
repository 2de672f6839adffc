#![cfg(feature = "async")]

use super::setup;
use std::time::Duration;
use wasmtime_bind::*;

const WAT: &str = r#"
    (module
        (import "host" "sleepy" (func $sleepy (param i32) (result i32)))
        (import "host" "outer" (func $outer (param funcref) (result i32)))
        (func $inner (export "inner") (result i32)
            i32.const 20
            call $sleepy)
        (elem declare func $inner)
        (func (export "run") (param i32) (result i32)
            local.get 0
            call $sleepy)
        (func (export "nested") (result i32)
            ref.func $inner
            call $outer))
"#;

fn async_config() -> Config {
    let mut config = Config::new();
    config.async_support(true);
    config
}

async fn instance() -> Result<(Context, Instance)> {
    let (mut cx, module) = setup(&async_config(), WAT)?;
    let sig = Signature::new([ValueKind::I32], [ValueKind::I32]);
    let sleepy = Func::new_async(&mut cx, sig, |_caller, args| {
        Box::new(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            anyhow::Ok(vec![Value::I32(args[0].as_i32()? + 1)])
        })
    })?;
    let sig = Signature::new([ValueKind::FuncRef], [ValueKind::I32]);
    let outer = Func::new_async(&mut cx, sig, |mut caller, args| {
        Box::new(async move {
            let f = args[0].get::<Func>()?;
            let results = f.call_async(&mut caller, &[]).await?;
            anyhow::Ok(results)
        })
    })?;
    cx.define("host", "sleepy", sleepy)?;
    cx.define("host", "outer", outer)?;
    let instance = cx.instantiate_async(&module).await?;
    Ok((cx, instance))
}

#[tokio::test]
async fn suspending_host_functions() -> Result<()> {
    let (mut cx, instance) = instance().await?;
    let run = instance.get_func(&mut cx, "run")?.unwrap();
    assert_eq!(
        run.call_async(&mut cx, &[Value::I32(1)]).await?,
        [Value::I32(2)]
    );

    let typed = run.typed::<i32, i32>(&mut cx)?.unwrap();
    assert_eq!(typed.call_async(&mut cx, 41).await?, 42);
    // sequential suspensions are fine
    assert_eq!(typed.call_async(&mut cx, 1).await?, 2);
    Ok(())
}

#[tokio::test]
async fn a_second_suspension_is_rejected() -> Result<()> {
    let (mut cx, instance) = instance().await?;
    let nested = instance.get_func(&mut cx, "nested")?.unwrap();
    let err = nested.call_async(&mut cx, &[]).await.unwrap_err();
    assert!(
        matches!(err, Error::Usage(UsageError::ConcurrentSuspension)),
        "{err:?}"
    );

    // The context is still usable afterwards.
    let inner = instance.get_func(&mut cx, "inner")?.unwrap();
    assert_eq!(inner.call_async(&mut cx, &[]).await?, [Value::I32(21)]);
    Ok(())
}

#[tokio::test]
async fn async_host_failures() -> Result<()> {
    let (mut cx, _) = setup(&async_config(), "(module)")?;
    let sig = Signature::new([], []);
    let f = Func::new_async(&mut cx, sig, |_caller, _args| {
        Box::new(async move {
            tokio::task::yield_now().await;
            Err::<Vec<Value>, _>(anyhow::anyhow!("later"))
        })
    })?;
    let err = f.call_async(&mut cx, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HostCause);
    assert_eq!(err.host_cause().unwrap().to_string(), "later");

    let sig = Signature::new([], [ValueKind::I32]);
    let wrong = Func::new_async(&mut cx, sig, |_caller, _args| {
        Box::new(async move { anyhow::Ok(Vec::<Value>::new()) })
    })?;
    let err = wrong.call_async(&mut cx, &[]).await.unwrap_err();
    assert!(matches!(err, Error::ArityMismatch { .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn sync_and_async_entry_points_do_not_mix() -> Result<()> {
    let (mut cx, instance) = instance().await?;
    let run = instance.get_func(&mut cx, "run")?.unwrap();
    let err = run.call(&mut cx, &[Value::I32(1)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(UsageError::AsyncMismatch {
            async_support: true,
            ..
        })
    ));

    let (mut sync_cx, module) = setup(&Config::new(), WAT)?;
    let sig = Signature::new([], []);
    let err = Func::new_async(&mut sync_cx, sig, |_caller, _args| {
        Box::new(async move { anyhow::Ok(Vec::<Value>::new()) })
    })
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Usage(UsageError::AsyncMismatch {
            async_support: false,
            ..
        })
    ));
    let err = sync_cx.instantiate_async(&module).await.unwrap_err();
    assert!(matches!(err, Error::Usage(UsageError::AsyncMismatch { .. })));

    let f = Func::wrap(&mut sync_cx, |_: &mut HostCaller<'_>, ()| Ok(()))?;
    let err = f.call_async(&mut sync_cx, &[]).await.unwrap_err();
    assert!(matches!(err, Error::Usage(UsageError::AsyncMismatch { .. })));
    Ok(())
}

#[tokio::test]
async fn fuel_yields_while_metered() -> Result<()> {
    let mut config = async_config();
    config
        .consume_fuel(true)
        .async_yield_interval(Some(100))
        .initial_fuel(Some(1_000_000));
    let (mut cx, module) = setup(
        &config,
        r#"
            (module
                (func (export "count") (param i32) (result i32)
                    (loop $l
                        local.get 0
                        i32.const 1
                        i32.sub
                        local.tee 0
                        br_if $l)
                    local.get 0))
        "#,
    )?;
    let instance = cx.instantiate_async(&module).await?;
    let count = instance.get_func(&mut cx, "count")?.unwrap();
    let typed = count.typed::<i32, i32>(&mut cx)?.unwrap();
    assert_eq!(typed.call_async(&mut cx, 1000).await?, 0);
    assert!(cx.fuel()? < 1_000_000);
    Ok(())
}
