use crate::context::{ContextData, ContextId};
use crate::value::ValueVec;
use crate::{
    fuel, trap, AsContext, AsContextMut, Error, HostCaller, Position, Result, Shape, Signature,
    UsageError, Value,
};
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;
use wasmtime::{AsContextMut as _, RootScope, StoreContextMut, Val};

#[cfg(feature = "async")]
pub(crate) mod async_fn;
pub(crate) mod typed;

pub use typed::{TypedFunc, WasmParams, WasmResults, WasmType};

type ValVec = SmallVec<[Val; 8]>;

/// A WebAssembly function owned by a [`Context`](crate::Context): either
/// exported by an instance or defined by the host.
///
/// `Func` is a cheap handle. Two handles compare equal exactly when they
/// denote the same function; a function reference that makes a round trip
/// through guest code comes back as an equal handle, and so does a host
/// function that an instance imports and hands back through an export, a
/// table or `ref.func`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Func {
    context: ContextId,
    index: u32,
}

pub(crate) struct FuncEntry {
    func: wasmtime::Func,
    pub(crate) signature: Signature,
    name: Option<String>,
}

/// The identity of an engine function.
///
/// Wasmtime builds a new function reference for a function each time an
/// instance exposes one of its imports, whether as an export, in a table or
/// through `ref.func`. The copy keeps the original's array-call entry point
/// and callee context, and that pair is unique to each callable: every host
/// function has a context of its own, and a guest function is told apart
/// from the others in its instance by its entry point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct Callee {
    array_call: usize,
    vmctx: usize,
}

/// The leading layout of wasmtime 22's `VMFuncRef`.
#[repr(C)]
struct RawFuncRef {
    array_call: *const u8,
    _wasm_call: *const u8,
    _type_index: u32,
    vmctx: *const u8,
}

impl Callee {
    fn of(store: &mut StoreContextMut<'_, ContextData>, func: &wasmtime::Func) -> Callee {
        // SAFETY: `to_raw` returns a pointer to the function's `VMFuncRef`,
        // which stays allocated for as long as the store does. Only its
        // pointer-sized fields are read, and nothing is written.
        unsafe {
            let raw = func.to_raw(&mut *store).cast::<RawFuncRef>();
            Callee {
                array_call: (*raw).array_call as usize,
                vmctx: (*raw).vmctx as usize,
            }
        }
    }
}

/// Every function a context has handed out a handle for, deduplicated by
/// [`Callee`].
#[derive(Default)]
pub(crate) struct FuncTable {
    entries: Vec<FuncEntry>,
    by_callee: HashMap<Callee, u32>,
}

impl FuncTable {
    fn next_index(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }

    fn push(&mut self, callee: Callee, entry: FuncEntry) -> u32 {
        let index = self.next_index();
        self.entries.push(entry);
        self.by_callee.insert(callee, index);
        index
    }

    pub(crate) fn name(&self, index: u32) -> Option<String> {
        self.entries.get(index as usize)?.name.clone()
    }

    /// Names a function after the first import or export it is found as.
    pub(crate) fn name_if_unnamed(&mut self, func: Func, name: impl FnOnce() -> String) {
        if let Some(entry) = self.entries.get_mut(func.index as usize) {
            entry.name.get_or_insert_with(name);
        }
    }
}

impl Func {
    /// Defines a host function with an explicit signature.
    ///
    /// The callback receives the arguments already boxed as [`Value`]s and
    /// a results slice pre-filled with the default value of each result
    /// kind. Results written with a different kind are promoted the way the
    /// [`Value`] accessors promote, or rejected with a type mismatch.
    ///
    /// An error returned by the callback unwinds the calling guest code and
    /// reaches the outermost caller as an [`Error::Host`] carrying the
    /// callback's error unchanged.
    pub fn new<F>(mut cx: impl AsContextMut, signature: Signature, func: F) -> Result<Func>
    where
        F: Fn(&mut HostCaller<'_>, &[Value], &mut [Value]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let mut store = cx.store_context_mut()?;
        let index = store.data().funcs.next_index();
        let ty = signature.to_func_type(store.engine());
        let sig = signature.clone();
        let raw = wasmtime::Func::new(&mut store, ty, move |mut caller, params, results| {
            enter_host(caller.as_context_mut(), index, &sig, params, results, &func)
        });
        let handle = Func::register(&mut store, raw, Some(signature))?;
        debug_assert_eq!(handle.index, index);
        Ok(handle)
    }

    /// Defines a host function from a closure over typed parameters.
    ///
    /// The signature is derived from `Params` and `Results`, which must be
    /// concrete host types. [`Value`] has no single kind and is rejected
    /// here; use [`Func::new`] for dynamically typed host functions.
    ///
    /// ```
    /// use wasmtime_bind::{Context, Engine, Func, HostCaller, Value};
    ///
    /// # fn main() -> wasmtime_bind::Result<()> {
    /// let engine = Engine::default();
    /// let mut cx = Context::new(&engine)?;
    /// let add = Func::wrap(&mut cx, |_: &mut HostCaller<'_>, (a, b): (i32, i64)| {
    ///     Ok(i64::from(a) + b)
    /// })?;
    /// assert_eq!(add.call(&mut cx, &[Value::I32(1), Value::I64(2)])?, [Value::I64(3)]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn wrap<Params, Results, F>(cx: impl AsContextMut, func: F) -> Result<Func>
    where
        Params: WasmParams,
        Results: WasmResults,
        F: Fn(&mut HostCaller<'_>, Params) -> anyhow::Result<Results> + Send + Sync + 'static,
    {
        let signature = Shape::of::<Params, Results>()
            .to_signature()
            .ok_or(UsageError::DynamicHostSignature)?;
        Func::new(cx, signature, move |caller, args, outs| {
            let params = Params::from_values(args)?;
            let mut values = ValueVec::new();
            func(caller, params)?.into_values(&mut values);
            for (out, value) in outs.iter_mut().zip(values) {
                *out = value;
            }
            Ok(())
        })
    }

    /// Defines the host function `(i32) -> ()` that terminates the running
    /// guest program with the given exit status.
    ///
    /// Statuses in `0..126` surface as [`Error::Exit`]; anything else is a
    /// guest fault with [`TrapCode::InvalidExitStatus`](crate::TrapCode).
    pub fn exit(cx: impl AsContextMut) -> Result<Func> {
        Func::wrap(cx, |_: &mut HostCaller<'_>, status: i32| -> anyhow::Result<()> {
            Err(Error::exit(status).into())
        })
    }

    /// The signature of this function.
    pub fn ty(&self, cx: impl AsContext) -> Result<Signature> {
        let store = cx.store_context()?;
        Ok(self.entry(store.data())?.signature.clone())
    }

    /// Calls this function with boxed arguments.
    ///
    /// Each argument is coerced to the declared parameter kind with the
    /// accessor promotions, so an `i32` may be passed where an `i64` is
    /// expected. The number of arguments must match exactly.
    ///
    /// # Errors
    ///
    /// * [`Error::ArityMismatch`] or [`Error::TypeMismatch`] for bad
    ///   arguments.
    /// * [`Error::OutOfFuel`] if fuel metering is on and no fuel is left.
    /// * [`Error::Host`], [`Error::Trap`] or [`Error::Exit`] if the call
    ///   failed while running.
    /// * [`UsageError::AsyncMismatch`] on a context with async support; use
    ///   [`Func::call_async`] there.
    pub fn call(&self, mut cx: impl AsContextMut, args: &[Value]) -> Result<Vec<Value>> {
        let store = cx.store_context_mut()?;
        invoke(store, *self, args).map(SmallVec::into_vec)
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn entry<'a>(&self, data: &'a ContextData) -> Result<&'a FuncEntry> {
        data.check_owner(self.context, "function")?;
        data.funcs
            .entries
            .get(self.index as usize)
            .ok_or(Error::Disposed("function"))
    }

    pub(crate) fn to_wasmtime(&self, data: &ContextData) -> Result<wasmtime::Func> {
        Ok(self.entry(data)?.func)
    }

    /// Returns the handle for an engine function, registering it on first
    /// sight.
    pub(crate) fn from_wasmtime(
        store: &mut StoreContextMut<'_, ContextData>,
        func: wasmtime::Func,
    ) -> Result<Func> {
        Func::register(store, func, None)
    }

    pub(crate) fn from_export(
        store: &mut StoreContextMut<'_, ContextData>,
        func: wasmtime::Func,
        name: &str,
    ) -> Result<Func> {
        let handle = Func::register(store, func, None)?;
        store
            .data_mut()
            .funcs
            .name_if_unnamed(handle, || name.to_string());
        Ok(handle)
    }

    fn register(
        store: &mut StoreContextMut<'_, ContextData>,
        func: wasmtime::Func,
        signature: Option<Signature>,
    ) -> Result<Func> {
        let callee = Callee::of(store, &func);
        let context = store.data().id();
        if let Some(&index) = store.data().funcs.by_callee.get(&callee) {
            return Ok(Func { context, index });
        }
        let signature = match signature {
            Some(signature) => signature,
            None => Signature::from_func_type(&func.ty(&*store))?,
        };
        let index = store.data_mut().funcs.push(
            callee,
            FuncEntry {
                func,
                signature,
                name: None,
            },
        );
        Ok(Func { context, index })
    }
}

/// Runs a host callback on behalf of the engine.
fn enter_host(
    mut store: StoreContextMut<'_, ContextData>,
    index: u32,
    signature: &Signature,
    params: &[Val],
    results: &mut [Val],
    body: impl FnOnce(&mut HostCaller<'_>, &[Value], &mut [Value]) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let args = params
        .iter()
        .map(|p| Value::from_val(&mut store, p))
        .collect::<Result<ValueVec>>()
        .map_err(trap::into_wasm)?;
    let mut outs: ValueVec = signature
        .results()
        .iter()
        .map(|kind| Value::default_for(*kind))
        .collect();
    log::trace!("entering host function #{index}");
    if let Err(cause) = body(&mut HostCaller::new(store.as_context_mut()), &args, &mut outs) {
        let name = store.data().funcs.name(index);
        return Err(trap::into_wasm(trap::host_failure(name, cause)));
    }
    write_results(&mut store, signature, &outs, results).map_err(trap::into_wasm)
}

/// Checks and converts what a host callback produced.
pub(crate) fn write_results(
    store: &mut StoreContextMut<'_, ContextData>,
    signature: &Signature,
    outs: &[Value],
    results: &mut [Val],
) -> Result<()> {
    const OP: &str = "host function return";
    if outs.len() != signature.results().len() {
        return Err(Error::ArityMismatch {
            op: OP,
            what: "results",
            expected: signature.results().len(),
            found: outs.len(),
        });
    }
    for (i, ((out, kind), slot)) in outs
        .iter()
        .zip(signature.results())
        .zip(results.iter_mut())
        .enumerate()
    {
        let value = out.coerce(*kind).map_err(|_| Error::TypeMismatch {
            op: OP,
            position: Position::Result(i),
            expected: *kind,
            found: out.kind(),
        })?;
        *slot = value.into_val(store)?;
    }
    Ok(())
}

/// Validates a call and converts its arguments.
///
/// Returns the engine function, the converted arguments and a results
/// buffer of the right length.
pub(crate) fn prepare(
    store: &mut StoreContextMut<'_, ContextData>,
    func: Func,
    args: &[Value],
    op: &'static str,
    is_async: bool,
) -> Result<(wasmtime::Func, ValVec, ValVec)> {
    let data = store.data();
    if data.async_support() != is_async {
        return Err(UsageError::AsyncMismatch {
            op,
            async_support: data.async_support(),
        }
        .into());
    }
    let entry = func.entry(data)?;
    let signature = &entry.signature;
    if args.len() != signature.params().len() {
        return Err(Error::ArityMismatch {
            op,
            what: "arguments",
            expected: signature.params().len(),
            found: args.len(),
        });
    }
    let args = args
        .iter()
        .zip(signature.params())
        .enumerate()
        .map(|(i, (arg, kind))| {
            arg.coerce(*kind).map_err(|_| Error::TypeMismatch {
                op,
                position: Position::Param(i),
                expected: *kind,
                found: arg.kind(),
            })
        })
        .collect::<Result<ValueVec>>()?;
    let raw = entry.func;
    let results: ValVec = smallvec![Val::I32(0); signature.results().len()];

    fuel::check_before_entry(store)?;
    let params = args
        .into_iter()
        .map(|arg| arg.into_val(store))
        .collect::<Result<ValVec>>()?;
    log::trace!("calling {func:?} with {} arguments", params.len());
    Ok((raw, params, results))
}

pub(crate) fn finish(
    store: &mut StoreContextMut<'_, ContextData>,
    func: Func,
    results: &[Val],
) -> Result<ValueVec> {
    let values = results
        .iter()
        .map(|r| Value::from_val(store, r))
        .collect::<Result<ValueVec>>()?;
    log::trace!("{func:?} returned {} results", values.len());
    Ok(values)
}

/// The synchronous call path shared by [`Func::call`] and
/// [`TypedFunc::call`].
pub(crate) fn invoke(
    mut store: StoreContextMut<'_, ContextData>,
    func: Func,
    args: &[Value],
) -> Result<ValueVec> {
    // Arguments and results may root `externref`s; they are released here.
    let mut scope = RootScope::new(&mut store);
    let mut store = scope.as_context_mut();
    let (raw, params, mut results) = prepare(&mut store, func, args, "call", false)?;
    raw.call(&mut store, &params, &mut results)
        .map_err(trap::from_wasm)?;
    finish(&mut store, func, &results)
}
