use crate::externals::ExternTable;
use crate::func::FuncTable;
use crate::func::typed::WrapperCache;
use crate::object::ObjectTable;
use crate::{trap, Engine, Error, Extern, Instance, Module, ObjectRef, Result, UsageError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use wasmtime::{AsContext as _, AsContextMut as _, Linker, Store, StoreContext, StoreContextMut};

/// Identifies one [`Context`] for as long as the process runs; ids are never
/// reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);
static LIVE_CONTEXTS: Mutex<BTreeSet<ContextId>> = Mutex::new(BTreeSet::new());

fn live_contexts() -> MutexGuard<'static, BTreeSet<ContextId>> {
    LIVE_CONTEXTS.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContextId {
    fn allocate() -> ContextId {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        live_contexts().insert(id);
        id
    }

    fn retire(self) {
        live_contexts().remove(&self);
    }

    fn is_live(self) -> bool {
        live_contexts().contains(&self)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(raw: u64) -> ContextId {
        ContextId(u64::MAX - raw)
    }
}

/// The state a [`Context`] keeps inside its store.
///
/// Every handle type in this crate (functions, instances, globals, tables,
/// memories and host objects) is an index into one of the tables kept here.
pub struct ContextData {
    id: ContextId,
    async_support: bool,
    metering: bool,
    pub(crate) funcs: FuncTable,
    pub(crate) objects: ObjectTable,
    pub(crate) wrappers: WrapperCache,
    pub(crate) instances: Vec<wasmtime::Instance>,
    pub(crate) globals: ExternTable<wasmtime::Global>,
    pub(crate) tables: ExternTable<wasmtime::Table>,
    pub(crate) memories: ExternTable<wasmtime::Memory>,
    #[cfg(feature = "async")]
    pub(crate) suspension: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ContextData {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn async_support(&self) -> bool {
        self.async_support
    }

    pub(crate) fn metering(&self) -> bool {
        self.metering
    }

    /// Fails unless a handle created by context `owner` may be used here.
    ///
    /// A handle from another context that is still alive is a usage error;
    /// a handle whose context is gone reports the resource as disposed.
    pub(crate) fn check_owner(&self, owner: ContextId, what: &'static str) -> Result<()> {
        if owner == self.id {
            Ok(())
        } else if owner.is_live() {
            Err(UsageError::WrongContext(what).into())
        } else {
            Err(Error::Disposed(what))
        }
    }

    pub(crate) fn check_object(&self, object: ObjectRef) -> Result<()> {
        self.check_owner(object.context(), "host object")?;
        self.objects.check(object)
    }
}

/// An execution context: owns functions, instances, globals, tables,
/// memories, host objects and a fuel counter.
///
/// Everything reachable from a context is single-threaded from the guest's
/// point of view. Handles created by a context only work with that context.
/// Once the context is [disposed](Context::dispose), or dropped, every
/// operation on it or on its handles fails with [`Error::Disposed`].
pub struct Context {
    id: ContextId,
    engine: Engine,
    inner: Option<Inner>,
}

struct Inner {
    store: Store<ContextData>,
    linker: Linker<ContextData>,
}

impl Context {
    /// Creates a new context in `engine`.
    ///
    /// If the engine was configured with an initial fuel amount, the new
    /// context starts with it.
    pub fn new(engine: &Engine) -> Result<Context> {
        let config = engine.config();
        let id = ContextId::allocate();
        let data = ContextData {
            id,
            async_support: config.async_support,
            metering: config.consume_fuel,
            funcs: FuncTable::default(),
            objects: ObjectTable::default(),
            wrappers: WrapperCache::default(),
            instances: Vec::new(),
            globals: ExternTable::default(),
            tables: ExternTable::default(),
            memories: ExternTable::default(),
            #[cfg(feature = "async")]
            suspension: Default::default(),
        };
        let mut linker = Linker::new(engine.inner());
        linker.allow_shadowing(true);
        let mut cx = Context {
            id,
            engine: engine.clone(),
            inner: Some(Inner {
                store: Store::new(engine.inner(), data),
                linker,
            }),
        };

        let store = &mut cx.inner_mut()?.store;
        if let Some(fuel) = config.initial_fuel {
            store.set_fuel(fuel)?;
        }
        #[cfg(feature = "async")]
        if let Some(interval) = config.async_yield_interval {
            store.fuel_async_yield_interval(Some(interval))?;
        }
        log::trace!("created context {id:?}");
        Ok(cx)
    }

    /// The engine this context was created in.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Whether [`Context::dispose`] was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_none()
    }

    /// Releases everything this context owns.
    ///
    /// Handles created by this context become unusable; cached typed
    /// wrappers are dropped with it. Calling this twice is a no-op.
    pub fn dispose(&mut self) {
        if self.inner.take().is_some() {
            log::trace!("disposed context {:?}", self.id);
            self.id.retire();
        }
    }

    /// Makes guest code trap with [`TrapCode::Interrupt`](crate::TrapCode)
    /// once the engine's epoch has been incremented `ticks` more times.
    ///
    /// Only has an effect if epoch interruption is enabled in the
    /// [`Config`](crate::Config).
    pub fn set_epoch_deadline(&mut self, ticks: u64) -> Result<()> {
        self.inner_mut()?.store.set_epoch_deadline(ticks);
        Ok(())
    }

    /// Makes `item` available to modules instantiated in this context under
    /// the import `module`/`name`. Later definitions replace earlier ones.
    pub fn define(&mut self, module: &str, name: &str, item: impl Into<Extern>) -> Result<()> {
        let item = item.into();
        let inner = self.inner_mut()?;
        let export = item.to_wasmtime(inner.store.data())?;
        inner.linker.define(&inner.store, module, name, export)?;
        if let Extern::Func(func) = item {
            inner.store.data_mut().funcs
                .name_if_unnamed(func, || format!("{module}::{name}"));
        }
        Ok(())
    }

    /// Instantiates `module`, resolving its imports against everything
    /// [defined](Context::define) so far.
    ///
    /// Traps raised by the module's start function are reported like traps
    /// raised by a call.
    pub fn instantiate(&mut self, module: &Module) -> Result<Instance> {
        let inner = self.inner_mut()?;
        if inner.store.data().async_support() {
            return Err(UsageError::AsyncMismatch {
                op: "instantiate",
                async_support: true,
            }
            .into());
        }
        let instance = inner
            .linker
            .instantiate(&mut inner.store, module.inner())
            .map_err(trap::from_wasm)?;
        Ok(Instance::register(inner.store.data_mut(), instance))
    }

    /// Same as [`Context::instantiate`] for contexts with async support.
    #[cfg(feature = "async")]
    pub async fn instantiate_async(&mut self, module: &Module) -> Result<Instance> {
        let inner = self.inner_mut()?;
        if !inner.store.data().async_support() {
            return Err(UsageError::AsyncMismatch {
                op: "instantiate_async",
                async_support: false,
            }
            .into());
        }
        let instance = inner
            .linker
            .instantiate_async(&mut inner.store, module.inner())
            .await
            .map_err(trap::from_wasm)?;
        Ok(Instance::register(inner.store.data_mut(), instance))
    }

    fn inner_mut(&mut self) -> Result<&mut Inner> {
        self.inner.as_mut().ok_or(Error::Disposed("context"))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The context a host function was called with.
///
/// A `HostCaller` can be used anywhere a context is expected, so a host
/// callback may call back into guest code, create host objects or adjust
/// fuel while it runs.
pub struct HostCaller<'a> {
    store: StoreContextMut<'a, ContextData>,
}

impl<'a> HostCaller<'a> {
    pub(crate) fn new(store: StoreContextMut<'a, ContextData>) -> HostCaller<'a> {
        HostCaller { store }
    }
}

/// Types that give shared access to a context: [`Context`] and
/// [`HostCaller`], and references to them.
pub trait AsContext {
    #[doc(hidden)]
    fn store_context(&self) -> Result<StoreContext<'_, ContextData>>;
}

/// Types that give exclusive access to a context.
pub trait AsContextMut: AsContext {
    #[doc(hidden)]
    fn store_context_mut(&mut self) -> Result<StoreContextMut<'_, ContextData>>;
}

impl AsContext for Context {
    fn store_context(&self) -> Result<StoreContext<'_, ContextData>> {
        match &self.inner {
            Some(inner) => Ok(inner.store.as_context()),
            None => Err(Error::Disposed("context")),
        }
    }
}

impl AsContextMut for Context {
    fn store_context_mut(&mut self) -> Result<StoreContextMut<'_, ContextData>> {
        Ok(self.inner_mut()?.store.as_context_mut())
    }
}

impl AsContext for HostCaller<'_> {
    fn store_context(&self) -> Result<StoreContext<'_, ContextData>> {
        Ok(self.store.as_context())
    }
}

impl AsContextMut for HostCaller<'_> {
    fn store_context_mut(&mut self) -> Result<StoreContextMut<'_, ContextData>> {
        Ok(self.store.as_context_mut())
    }
}

impl<T: AsContext + ?Sized> AsContext for &T {
    fn store_context(&self) -> Result<StoreContext<'_, ContextData>> {
        T::store_context(*self)
    }
}

impl<T: AsContext + ?Sized> AsContext for &mut T {
    fn store_context(&self) -> Result<StoreContext<'_, ContextData>> {
        T::store_context(*self)
    }
}

impl<T: AsContextMut + ?Sized> AsContextMut for &mut T {
    fn store_context_mut(&mut self) -> Result<StoreContextMut<'_, ContextData>> {
        T::store_context_mut(*self)
    }
}
