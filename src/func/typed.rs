use super::invoke;
use crate::signature::Slot;
use crate::value::ValueVec;
use crate::{AsContextMut, Error, Func, ObjectRef, Result, Shape, Signature, V128, Value, ValueKind};
use core::any::TypeId;
use core::marker;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// A function bound to a host-side call shape.
///
/// Created by [`Func::typed`] once the shape `(Params) -> Results` has been
/// checked against the function's signature. Calls box each argument, go
/// through the same bridge as [`Func::call`], and unbox each result, without
/// re-checking the signature.
///
/// Typed wrappers are cached per context: asking for the same function with
/// the same shape again returns a handle to the same wrapper, see
/// [`TypedFunc::same_wrapper`].
pub struct TypedFunc<Params, Results> {
    _a: marker::PhantomData<fn(Params) -> Results>,
    thunk: Arc<Thunk>,
}

impl<Params, Results> Clone for TypedFunc<Params, Results> {
    fn clone(&self) -> TypedFunc<Params, Results> {
        TypedFunc {
            _a: marker::PhantomData,
            thunk: self.thunk.clone(),
        }
    }
}

impl<Params, Results> core::fmt::Debug for TypedFunc<Params, Results> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypedFunc")
            .field("func", &self.thunk.func)
            .field("signature", &self.thunk.signature)
            .finish()
    }
}

impl<Params, Results> TypedFunc<Params, Results>
where
    Params: WasmParams,
    Results: WasmResults,
{
    /// Returns the underlying [`Func`], losing the static type information.
    pub fn func(&self) -> Func {
        self.thunk.func
    }

    /// The signature that was checked when this wrapper was built.
    pub fn signature(&self) -> &Signature {
        &self.thunk.signature
    }

    /// Whether `self` and `other` are handles to the same cached wrapper.
    pub fn same_wrapper<P2, R2>(&self, other: &TypedFunc<P2, R2>) -> bool {
        Arc::ptr_eq(&self.thunk, &other.thunk)
    }

    /// Invokes the function with `params`.
    ///
    /// Fails the same ways [`Func::call`] does.
    pub fn call(&self, mut cx: impl AsContextMut, params: Params) -> Result<Results> {
        let store = cx.store_context_mut()?;
        let mut args = ValueVec::new();
        params.into_values(&mut args);
        let results = invoke(store, self.thunk.func, &args)?;
        Results::from_values(&results)
    }

    /// Invokes the function with `params` on a context with async support.
    ///
    /// Fails the same ways [`Func::call_async`] does.
    #[cfg(feature = "async")]
    pub async fn call_async(&self, mut cx: impl AsContextMut, params: Params) -> Result<Results> {
        let store = cx.store_context_mut()?;
        let mut args = ValueVec::new();
        params.into_values(&mut args);
        let results = super::async_fn::invoke_async(store, self.thunk.func, &args).await?;
        Results::from_values(&results)
    }
}

pub(crate) struct Thunk {
    func: Func,
    signature: Signature,
}

/// Typed wrappers built so far, keyed by function and requested shape.
///
/// Entries are never evicted; they go away with the context.
#[derive(Default)]
pub(crate) struct WrapperCache {
    entries: HashMap<(u32, TypeId), Arc<Thunk>>,
}

impl WrapperCache {
    fn get_or_build<P, R>(&mut self, func: Func, signature: &Signature) -> Option<Arc<Thunk>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let key = (func.index(), TypeId::of::<(P, R)>());
        if let Some(thunk) = self.entries.get(&key) {
            return Some(thunk.clone());
        }
        if !Shape::of::<P, R>().matches(signature) {
            log::trace!(
                "{func:?} with signature {signature} does not match `{}`",
                core::any::type_name::<(P, R)>()
            );
            return None;
        }
        log::trace!(
            "building typed wrapper `{}` for {func:?}",
            core::any::type_name::<(P, R)>()
        );
        let thunk = Arc::new(Thunk {
            func,
            signature: signature.clone(),
        });
        self.entries.insert(key, thunk.clone());
        Some(thunk)
    }
}

impl Func {
    /// Attempts to bind this function to the host call shape
    /// `(Params) -> Results`.
    ///
    /// Returns `Ok(None)` if the shape does not match the function's
    /// signature exactly; this is not an error, and untyped access through
    /// [`Func::call`] remains available. Shapes wider than
    /// [`MAX_TYPED_ARITY`](crate::MAX_TYPED_ARITY) never match.
    ///
    /// Each distinct `(Params, Results)` pair gets its own cache entry, even
    /// when two shapes would accept the same signature. Binding the same
    /// function with the same shape twice returns the same wrapper.
    ///
    /// # Errors
    ///
    /// Fails if the context was disposed or if this function belongs to
    /// another context.
    pub fn typed<Params, Results>(
        &self,
        mut cx: impl AsContextMut,
    ) -> Result<Option<TypedFunc<Params, Results>>>
    where
        Params: WasmParams,
        Results: WasmResults,
    {
        let mut store = cx.store_context_mut()?;
        let data = store.data_mut();
        let signature = self.entry(data)?.signature.clone();
        let thunk = data
            .wrappers
            .get_or_build::<Params, Results>(*self, &signature);
        Ok(thunk.map(|thunk| TypedFunc {
            _a: marker::PhantomData,
            thunk,
        }))
    }
}

/// A host type that can be passed to and returned from typed functions.
///
/// This trait should not be implemented by user types.
pub trait WasmType: Copy + Send + Sync + 'static {
    #[doc(hidden)]
    fn slot() -> Slot;

    #[doc(hidden)]
    fn into_value(self) -> Value;

    #[doc(hidden)]
    fn from_value(value: Value) -> Result<Self>;
}

macro_rules! primitives {
    ($($ty:ty => $kind:ident $read:ident)*) => ($(
        impl WasmType for $ty {
            #[inline]
            fn slot() -> Slot {
                Slot::Kind(ValueKind::$kind)
            }

            #[inline]
            fn into_value(self) -> Value {
                Value::from(self)
            }

            #[inline]
            fn from_value(value: Value) -> Result<Self> {
                value.$read()
            }
        }
    )*)
}

primitives! {
    i32 => I32 as_i32
    i64 => I64 as_i64
    f32 => F32 as_f32
    f64 => F64 as_f64
    V128 => V128 as_v128
    Option<Func> => FuncRef as_func_ref
    Option<ObjectRef> => ExternRef as_extern_ref
}

impl WasmType for Func {
    fn slot() -> Slot {
        Slot::Kind(ValueKind::FuncRef)
    }

    fn into_value(self) -> Value {
        Value::from(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value
            .as_func_ref()?
            .ok_or(Error::NullReference(ValueKind::FuncRef))
    }
}

impl WasmType for ObjectRef {
    fn slot() -> Slot {
        Slot::Kind(ValueKind::ExternRef)
    }

    fn into_value(self) -> Value {
        Value::from(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value
            .as_extern_ref()?
            .ok_or(Error::NullReference(ValueKind::ExternRef))
    }
}

// The dynamic box stands for "any kind" in a requested shape.
impl WasmType for Value {
    fn slot() -> Slot {
        Slot::Any
    }

    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

/// The parameters of a typed function: a bare [`WasmType`] or a tuple of up
/// to [`MAX_TYPED_ARITY`](crate::MAX_TYPED_ARITY) of them.
pub trait WasmParams: Sized + 'static {
    #[doc(hidden)]
    fn slots(dst: &mut SmallVec<[Slot; 8]>);

    #[doc(hidden)]
    fn into_values(self, dst: &mut SmallVec<[Value; 8]>);

    #[doc(hidden)]
    fn from_values(values: &[Value]) -> Result<Self>;
}

// Forward an impl from `T` to `(T,)` for convenience if there's only one
// parameter.
impl<T> WasmParams for T
where
    T: WasmType,
{
    fn slots(dst: &mut SmallVec<[Slot; 8]>) {
        <(T,) as WasmParams>::slots(dst)
    }

    fn into_values(self, dst: &mut SmallVec<[Value; 8]>) {
        <(T,) as WasmParams>::into_values((self,), dst)
    }

    fn from_values(values: &[Value]) -> Result<Self> {
        <(T,) as WasmParams>::from_values(values).map(|(t,)| t)
    }
}

macro_rules! for_each_tuple {
    ($mac:ident) => {
        $mac!(0);
        $mac!(1 A1);
        $mac!(2 A1 A2);
        $mac!(3 A1 A2 A3);
        $mac!(4 A1 A2 A3 A4);
        $mac!(5 A1 A2 A3 A4 A5);
        $mac!(6 A1 A2 A3 A4 A5 A6);
        $mac!(7 A1 A2 A3 A4 A5 A6 A7);
    };
}

macro_rules! impl_wasm_params {
    ($n:tt $($t:ident)*) => {
        #[allow(non_snake_case, reason = "macro-generated bindings reuse type names")]
        impl<$($t: WasmType,)*> WasmParams for ($($t,)*) {
            fn slots(_dst: &mut SmallVec<[Slot; 8]>) {
                $(_dst.push($t::slot());)*
            }

            fn into_values(self, _dst: &mut SmallVec<[Value; 8]>) {
                let ($($t,)*) = self;
                $(_dst.push($t.into_value());)*
            }

            fn from_values(values: &[Value]) -> Result<Self> {
                let [$($t,)*] = values else {
                    return Err(Error::ArityMismatch {
                        op: "typed conversion",
                        what: "values",
                        expected: $n,
                        found: values.len(),
                    });
                };
                Ok(($($t::from_value(*$t)?,)*))
            }
        }
    };
}

for_each_tuple!(impl_wasm_params);

/// The results of a typed function: `()`, a bare [`WasmType`], or a tuple
/// of up to [`MAX_TYPED_ARITY`](crate::MAX_TYPED_ARITY) of them.
pub trait WasmResults: WasmParams {}

impl<T: WasmParams> WasmResults for T {}
