//! Host functions that suspend, and calls that can be suspended.
//!
//! A context runs at most one suspended host callback at a time. The flag
//! lives in [`ContextData`] and is claimed by a [`Suspension`] guard for as
//! long as the callback's future is pending; a second callback reaching its
//! suspension point while the flag is held fails with
//! [`UsageError::ConcurrentSuspension`] instead of queueing.

use super::{finish, prepare, write_results, Func};
use crate::context::ContextData;
use crate::value::ValueVec;
use crate::{trap, AsContextMut, HostCaller, Result, Signature, UsageError, Value};
use core::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wasmtime::{AsContextMut as _, RootScope, StoreContextMut, Val};

/// Holds a context's suspension flag until dropped.
#[derive(Debug)]
pub(crate) struct Suspension {
    flag: Arc<AtomicBool>,
}

impl Suspension {
    pub(crate) fn begin(flag: &Arc<AtomicBool>) -> Result<Suspension> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("rejecting a suspension while another one is outstanding");
            return Err(UsageError::ConcurrentSuspension.into());
        }
        Ok(Suspension { flag: flag.clone() })
    }
}

impl Drop for Suspension {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Func {
    /// Defines a host function whose callback returns a future.
    ///
    /// Guest code calling this function suspends until the future resolves.
    /// Only one such suspension may be outstanding per context: if the
    /// callback, directly or through guest code it calls, reaches another
    /// async host function before its own future resolves, that inner call
    /// fails with [`UsageError::ConcurrentSuspension`]. The context stays
    /// usable afterwards.
    ///
    /// Requires a context with async support.
    ///
    /// ```
    /// use wasmtime_bind::{Config, Context, Engine, Func, Signature, Value, ValueKind};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> wasmtime_bind::Result<()> {
    /// let engine = Engine::new(Config::new().async_support(true))?;
    /// let mut cx = Context::new(&engine)?;
    /// let sig = Signature::new([ValueKind::I32], [ValueKind::I32]);
    /// let f = Func::new_async(&mut cx, sig, |_caller, args| {
    ///     Box::new(async move {
    ///         tokio::task::yield_now().await;
    ///         anyhow::Ok(vec![Value::I32(args[0].as_i32()? + 1)])
    ///     })
    /// })?;
    /// assert_eq!(f.call_async(&mut cx, &[Value::I32(1)]).await?, [Value::I32(2)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new_async<F>(mut cx: impl AsContextMut, signature: Signature, func: F) -> Result<Func>
    where
        F: for<'a> Fn(
                HostCaller<'a>,
                Vec<Value>,
            ) -> Box<dyn Future<Output = anyhow::Result<Vec<Value>>> + Send + 'a>
            + Send
            + Sync
            + 'static,
    {
        let mut store = cx.store_context_mut()?;
        if !store.data().async_support() {
            return Err(UsageError::AsyncMismatch {
                op: "Func::new_async",
                async_support: false,
            }
            .into());
        }
        let index = store.data().funcs.next_index();
        let ty = signature.to_func_type(store.engine());
        let func = Arc::new(func);
        let sig = Arc::new(signature.clone());
        let raw = wasmtime::Func::new_async(&mut store, ty, move |mut caller, params, results| {
            let func = func.clone();
            let sig = sig.clone();
            Box::new(async move {
                enter_host_async(caller.as_context_mut(), index, &sig, params, results, &*func)
                    .await
            })
        });
        let handle = Func::register(&mut store, raw, Some(signature))?;
        debug_assert_eq!(handle.index, index);
        Ok(handle)
    }

    /// Calls this function on a context with async support.
    ///
    /// Argument handling and errors are the same as for [`Func::call`].
    /// Calling this on a context without async support is a
    /// [`UsageError::AsyncMismatch`].
    pub async fn call_async(&self, mut cx: impl AsContextMut, args: &[Value]) -> Result<Vec<Value>> {
        let store = cx.store_context_mut()?;
        invoke_async(store, *self, args)
            .await
            .map(smallvec::SmallVec::into_vec)
    }
}

async fn enter_host_async<F>(
    mut store: StoreContextMut<'_, ContextData>,
    index: u32,
    signature: &Signature,
    params: &[Val],
    results: &mut [Val],
    func: &F,
) -> anyhow::Result<()>
where
    F: for<'a> Fn(
        HostCaller<'a>,
        Vec<Value>,
    ) -> Box<dyn Future<Output = anyhow::Result<Vec<Value>>> + Send + 'a>,
{
    let args = params
        .iter()
        .map(|p| Value::from_val(&mut store, p))
        .collect::<Result<Vec<_>>>()
        .map_err(trap::into_wasm)?;
    let suspension = Suspension::begin(&store.data().suspension).map_err(trap::into_wasm)?;
    log::trace!("entering async host function #{index}");
    let outcome = Box::into_pin(func(HostCaller::new(store.as_context_mut()), args)).await;
    drop(suspension);

    let outs = match outcome {
        Ok(outs) => outs,
        Err(cause) => {
            let name = store.data().funcs.name(index);
            return Err(trap::into_wasm(trap::host_failure(name, cause)));
        }
    };
    write_results(&mut store, signature, &outs, results).map_err(trap::into_wasm)
}

/// The asynchronous call path shared by [`Func::call_async`] and
/// [`TypedFunc::call_async`](crate::TypedFunc::call_async).
pub(crate) async fn invoke_async(
    mut store: StoreContextMut<'_, ContextData>,
    func: Func,
    args: &[Value],
) -> Result<ValueVec> {
    let mut scope = RootScope::new(&mut store);
    let mut store = scope.as_context_mut();
    let (raw, params, mut results) = prepare(&mut store, func, args, "call_async", true)?;
    raw.call_async(&mut store, &params, &mut results)
        .await
        .map_err(trap::from_wasm)?;
    finish(&mut store, func, &results)
}
