use super::setup;
use wasmtime_bind::*;

const WAT: &str = r#"
    (module
        (import "env" "exit" (func $exit (param i32)))
        (import "env" "relay" (func $relay (param funcref i32)))
        (func $quit (param i32)
            local.get 0
            call $exit
            unreachable)
        (elem declare func $quit)
        (func (export "quit") (param i32)
            local.get 0
            call $quit)
        (func (export "quit_through_host") (param i32)
            ref.func $quit
            local.get 0
            call $relay))
"#;

fn run(entry: &str, status: i32) -> Result<Error> {
    let (mut cx, module) = setup(&Config::new(), WAT)?;
    let exit = Func::exit(&mut cx)?;
    let relay = Func::wrap(
        &mut cx,
        |caller: &mut HostCaller<'_>, (f, status): (Func, i32)| {
            f.call(caller, &[Value::I32(status)])?;
            Ok(())
        },
    )?;
    cx.define("env", "exit", exit)?;
    cx.define("env", "relay", relay)?;
    let instance = cx.instantiate(&module)?;
    let quit = instance.get_func(&mut cx, entry)?.unwrap();
    Ok(quit.call(&mut cx, &[Value::I32(status)]).unwrap_err())
}

#[test]
fn valid_statuses() -> Result<()> {
    for status in [0, 1, 125] {
        let err = run("quit", status)?;
        assert_eq!(err.kind(), ErrorKind::Exit, "{err:?}");
        assert_eq!(err.exit_status(), Some(status));
        assert!(err.host_cause().is_none());
    }
    Ok(())
}

#[test]
fn invalid_statuses() -> Result<()> {
    for status in [-1, 126, 255] {
        let err = run("quit", status)?;
        assert_eq!(err.kind(), ErrorKind::GuestFault, "{err:?}");
        assert_eq!(err.exit_status(), None);
        assert_eq!(err.trap_code(), Some(TrapCode::InvalidExitStatus(status)));
        let frames = err.frames();
        assert!(!frames.is_empty(), "no frames for status {status}");
        assert_eq!(frames[0].func_name(), Some("quit"));
    }
    Ok(())
}

#[test]
fn exit_unwinds_through_host_frames() -> Result<()> {
    let err = run("quit_through_host", 3)?;
    assert_eq!(err.exit_status(), Some(3));
    Ok(())
}

#[test]
fn exit_signature() -> Result<()> {
    let (mut cx, _) = setup(&Config::new(), "(module)")?;
    let exit = Func::exit(&mut cx)?;
    assert_eq!(exit.ty(&cx)?, Signature::new([ValueKind::I32], []));
    // calling it from the host directly reports the exit too
    let err = exit.call(&mut cx, &[Value::I32(2)]).unwrap_err();
    assert_eq!(err.exit_status(), Some(2));
    Ok(())
}
