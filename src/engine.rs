use crate::context::{ContextData, ContextId};
use crate::externals::ExternTable;
use crate::{AsContextMut, Config, Error, Func, Global, Memory, Result, Table};
use std::sync::Arc;
use wasmtime::StoreContextMut;

/// A compilation environment shared by any number of [`Context`]s.
///
/// Cloning an `Engine` is cheap and yields a handle to the same engine.
///
/// [`Context`]: crate::Context
#[derive(Clone)]
pub struct Engine {
    inner: wasmtime::Engine,
    config: Arc<Config>,
}

impl Engine {
    /// Creates an engine with the given settings.
    ///
    /// # Errors
    ///
    /// Fails if `config` is inconsistent, for example an initial fuel
    /// amount without fuel metering, or if the engine rejects it.
    pub fn new(config: &Config) -> Result<Engine> {
        let inner = wasmtime::Engine::new(&config.to_wasmtime()?)?;
        Ok(Engine {
            inner,
            config: Arc::new(config.clone()),
        })
    }

    /// The settings this engine was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Advances the epoch of every context in this engine by one tick.
    ///
    /// Guest code running in a context whose
    /// [deadline](crate::Context::set_epoch_deadline) is reached traps with
    /// [`TrapCode::Interrupt`](crate::TrapCode::Interrupt).
    pub fn increment_epoch(&self) {
        self.inner.increment_epoch();
    }

    pub(crate) fn inner(&self) -> &wasmtime::Engine {
        &self.inner
    }
}

impl Default for Engine {
    fn default() -> Engine {
        Engine {
            inner: wasmtime::Engine::default(),
            config: Arc::new(Config::default()),
        }
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A compiled WebAssembly module, ready to be instantiated in any context
/// of the engine it was compiled for.
#[derive(Clone)]
pub struct Module {
    inner: wasmtime::Module,
}

impl Module {
    /// Compiles a module from its binary or text encoding.
    pub fn new(engine: &Engine, bytes: impl AsRef<[u8]>) -> Result<Module> {
        let inner = wasmtime::Module::new(engine.inner(), bytes)?;
        log::debug!("compiled module {:?}", inner.name());
        Ok(Module { inner })
    }

    /// The module's name from its name section, if any.
    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    /// The names of the module's exports, in order.
    pub fn exports(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.exports().map(|export| export.name())
    }

    pub(crate) fn inner(&self) -> &wasmtime::Module {
        &self.inner
    }
}

impl core::fmt::Debug for Module {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// An instantiated module.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Instance {
    context: ContextId,
    index: u32,
}

impl Instance {
    pub(crate) fn register(data: &mut ContextData, instance: wasmtime::Instance) -> Instance {
        data.instances.push(instance);
        Instance {
            context: data.id(),
            index: u32::try_from(data.instances.len() - 1).unwrap_or(u32::MAX),
        }
    }

    fn resolve(&self, data: &ContextData) -> Result<wasmtime::Instance> {
        data.check_owner(self.context, "instance")?;
        data.instances
            .get(self.index as usize)
            .copied()
            .ok_or(Error::Disposed("instance"))
    }

    /// Looks up an exported function.
    pub fn get_func(&self, mut cx: impl AsContextMut, name: &str) -> Result<Option<Func>> {
        let mut store = cx.store_context_mut()?;
        let instance = self.resolve(store.data())?;
        match instance.get_func(&mut store, name) {
            Some(func) => Func::from_export(&mut store, func, name).map(Some),
            None => Ok(None),
        }
    }

    /// Looks up an exported global.
    ///
    /// Looking up the same export again returns an equal handle.
    pub fn get_global(&self, mut cx: impl AsContextMut, name: &str) -> Result<Option<Global>> {
        let mut store = cx.store_context_mut()?;
        let instance = self.resolve(store.data())?;
        let index = self.export(&mut store, |data| &mut data.globals, name, |store| {
            instance.get_global(store, name)
        });
        Ok(index.map(|index| Global::at(self.context, index)))
    }

    /// Looks up an exported table.
    pub fn get_table(&self, mut cx: impl AsContextMut, name: &str) -> Result<Option<Table>> {
        let mut store = cx.store_context_mut()?;
        let instance = self.resolve(store.data())?;
        let index = self.export(&mut store, |data| &mut data.tables, name, |store| {
            instance.get_table(store, name)
        });
        Ok(index.map(|index| Table::at(self.context, index)))
    }

    /// Looks up an exported memory.
    pub fn get_memory(&self, mut cx: impl AsContextMut, name: &str) -> Result<Option<Memory>> {
        let mut store = cx.store_context_mut()?;
        let instance = self.resolve(store.data())?;
        let index = self.export(&mut store, |data| &mut data.memories, name, |store| {
            instance.get_memory(store, name)
        });
        Ok(index.map(|index| Memory::at(self.context, index)))
    }

    /// Returns the index of export `name` in `table`, registering it on
    /// first sight.
    fn export<T: Copy>(
        &self,
        store: &mut StoreContextMut<'_, ContextData>,
        table: fn(&mut ContextData) -> &mut ExternTable<T>,
        name: &str,
        lookup: impl FnOnce(&mut StoreContextMut<'_, ContextData>) -> Option<T>,
    ) -> Option<u32> {
        if let Some(index) = table(store.data_mut()).exported(self.index, name) {
            return Some(index);
        }
        let item = lookup(store)?;
        Some(table(store.data_mut()).push_export(self.index, name, item))
    }
}
