mod async_functions;
mod exit;
mod func;
mod traps;
mod values;

use wasmtime_bind::{Config, Context, Engine, Module, Result};

/// Compiles `wat` on an engine built from `config` and creates a fresh
/// context next to it.
pub(crate) fn setup(config: &Config, wat: &str) -> Result<(Context, Module)> {
    let _ = env_logger::try_init();

    let engine = Engine::new(config)?;
    let module = Module::new(&engine, wat)?;
    let cx = Context::new(&engine)?;
    Ok((cx, module))
}
