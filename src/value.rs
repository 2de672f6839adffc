use crate::context::ContextData;
use crate::{Error, Func, ObjectRef, Result, UsageError, ValueKind, WasmType};
use smallvec::SmallVec;
use wasmtime::{ExternRef, GcHeapOutOfMemory, Rooted, StoreContextMut, Val};

/// Inline storage for the boxed arguments or results of one call.
pub(crate) type ValueVec = SmallVec<[Value; 8]>;

/// A 128-bit WebAssembly vector, stored as its little-endian bit pattern.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct V128(u128);

impl V128 {
    /// The number of bytes in a vector.
    pub const BYTES: usize = 16;

    /// Builds a vector from exactly 16 little-endian bytes.
    ///
    /// Any other length is an [`Error::LengthMismatch`].
    pub fn from_bytes(bytes: &[u8]) -> Result<V128> {
        let bytes: [u8; V128::BYTES] = bytes.try_into().map_err(|_| Error::LengthMismatch {
            expected: V128::BYTES,
            found: bytes.len(),
        })?;
        Ok(V128(u128::from_le_bytes(bytes)))
    }

    /// The vector as a 128-bit integer.
    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// The vector's little-endian bytes.
    pub fn to_bytes(&self) -> [u8; V128::BYTES] {
        self.0.to_le_bytes()
    }
}

impl From<u128> for V128 {
    fn from(bits: u128) -> V128 {
        V128(bits)
    }
}

impl From<[u8; V128::BYTES]> for V128 {
    fn from(bytes: [u8; V128::BYTES]) -> V128 {
        V128(u128::from_le_bytes(bytes))
    }
}

impl From<V128> for u128 {
    fn from(v: V128) -> u128 {
        v.0
    }
}

/// A boxed WebAssembly value of any kind.
///
/// A `Value` is what crosses the host/guest boundary on the untyped call
/// path. The variant determines which payload is valid; reading it through
/// an accessor for another kind fails with [`Error::InvalidCast`] naming
/// both kinds. The exceptions are lossless and lossy numeric promotions:
/// an `i32` box may be read as `i64`, `f32` or `f64`, and an `i64` box as
/// `f32` or `f64`. Narrowing never happens implicitly.
///
/// Floats are stored as their raw bits so that NaN payloads survive a round
/// trip through the box.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// The bits of a 32-bit float.
    F32(u32),
    /// The bits of a 64-bit float.
    F64(u64),
    /// A 128-bit vector.
    V128(V128),
    /// A function reference, `None` being the null reference.
    FuncRef(Option<Func>),
    /// A host object reference, `None` being the null reference.
    ExternRef(Option<ObjectRef>),
}

macro_rules! accessors {
    ($(
        $(#[$attr:meta])*
        $name:ident -> $ty:ty, $to:ident {
            $($pat:pat => $e:expr,)*
        }
    )*) => ($(
        $(#[$attr])*
        pub fn $name(&self) -> Result<$ty> {
            match *self {
                $($pat => Ok($e),)*
                _ => Err(self.cast_error(ValueKind::$to)),
            }
        }
    )*)
}

impl Value {
    /// The null function reference.
    pub const NULL_FUNC_REF: Value = Value::FuncRef(None);

    /// The null host object reference.
    pub const NULL_EXTERN_REF: Value = Value::ExternRef(None);

    /// Returns the zero value (or null reference) of `kind`.
    pub fn default_for(kind: ValueKind) -> Value {
        match kind {
            ValueKind::I32 => Value::I32(0),
            ValueKind::I64 => Value::I64(0),
            ValueKind::F32 => Value::F32(0),
            ValueKind::F64 => Value::F64(0),
            ValueKind::V128 => Value::V128(V128::default()),
            ValueKind::FuncRef => Value::FuncRef(None),
            ValueKind::ExternRef => Value::ExternRef(None),
        }
    }

    /// Builds a vector box from exactly 16 bytes.
    pub fn v128_from_bytes(bytes: &[u8]) -> Result<Value> {
        V128::from_bytes(bytes).map(Value::V128)
    }

    /// The kind of this box.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::V128(_) => ValueKind::V128,
            Value::FuncRef(_) => ValueKind::FuncRef,
            Value::ExternRef(_) => ValueKind::ExternRef,
        }
    }

    /// Whether this box holds a null reference.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::FuncRef(None) | Value::ExternRef(None))
    }

    accessors! {
        /// Reads an `i32`.
        as_i32 -> i32, I32 {
            Value::I32(v) => v,
        }
        /// Reads an `i64`, widening an `i32` box.
        as_i64 -> i64, I64 {
            Value::I32(v) => v.into(),
            Value::I64(v) => v,
        }
        /// Reads an `f32`, converting integer boxes.
        as_f32 -> f32, F32 {
            Value::I32(v) => v as f32,
            Value::I64(v) => v as f32,
            Value::F32(bits) => f32::from_bits(bits),
        }
        /// Reads an `f64`, converting integer boxes.
        as_f64 -> f64, F64 {
            Value::I32(v) => v.into(),
            Value::I64(v) => v as f64,
            Value::F64(bits) => f64::from_bits(bits),
        }
        /// Reads a vector.
        as_v128 -> V128, V128 {
            Value::V128(v) => v,
        }
        /// Reads a nullable function reference.
        as_func_ref -> Option<Func>, FuncRef {
            Value::FuncRef(f) => f,
        }
        /// Reads a nullable host object reference.
        as_extern_ref -> Option<ObjectRef>, ExternRef {
            Value::ExternRef(r) => r,
        }
    }

    /// Reads the payload as host type `T`.
    ///
    /// ```
    /// use wasmtime_bind::Value;
    ///
    /// let v = Value::from(7i32);
    /// assert_eq!(v.get::<i64>().unwrap(), 7);
    /// assert!(Value::from(7i64).get::<i32>().is_err());
    /// ```
    pub fn get<T: WasmType>(&self) -> Result<T> {
        T::from_value(*self)
    }

    /// Re-boxes this value as `kind`, applying the same promotions as the
    /// accessors.
    pub fn coerce(self, kind: ValueKind) -> Result<Value> {
        if self.kind() == kind {
            return Ok(self);
        }
        Ok(match kind {
            ValueKind::I32 => Value::I32(self.as_i32()?),
            ValueKind::I64 => Value::I64(self.as_i64()?),
            ValueKind::F32 => Value::from(self.as_f32()?),
            ValueKind::F64 => Value::from(self.as_f64()?),
            ValueKind::V128 => Value::V128(self.as_v128()?),
            ValueKind::FuncRef => Value::FuncRef(self.as_func_ref()?),
            ValueKind::ExternRef => Value::ExternRef(self.as_extern_ref()?),
        })
    }

    fn cast_error(&self, to: ValueKind) -> Error {
        Error::InvalidCast {
            from: self.kind(),
            to,
        }
    }

    /// Converts this box into the engine's representation.
    ///
    /// References are resolved against the context: functions must belong
    /// to it and host objects must still be live. A host object is wrapped in
    /// a fresh `externref` rooted in the innermost
    /// [`RootScope`](wasmtime::RootScope) of `store`, so callers open a scope
    /// around the conversion and whatever consumes the result.
    pub(crate) fn into_val(self, store: &mut StoreContextMut<'_, ContextData>) -> Result<Val> {
        Ok(match self {
            Value::I32(v) => Val::I32(v),
            Value::I64(v) => Val::I64(v),
            Value::F32(bits) => Val::F32(bits),
            Value::F64(bits) => Val::F64(bits),
            Value::V128(v) => Val::V128(v.as_u128().into()),
            Value::FuncRef(None) => Val::FuncRef(None),
            Value::FuncRef(Some(func)) => Val::FuncRef(Some(func.to_wasmtime(store.data())?)),
            Value::ExternRef(None) => Val::ExternRef(None),
            Value::ExternRef(Some(object)) => {
                store.data().check_object(object)?;
                Val::ExternRef(Some(extern_ref(store, object)?))
            }
        })
    }

    /// Boxes a value produced by the engine.
    pub(crate) fn from_val(store: &mut StoreContextMut<'_, ContextData>, val: &Val) -> Result<Value> {
        Ok(match val {
            Val::I32(v) => Value::I32(*v),
            Val::I64(v) => Value::I64(*v),
            Val::F32(bits) => Value::F32(*bits),
            Val::F64(bits) => Value::F64(*bits),
            Val::V128(v) => Value::V128(v.as_u128().into()),
            Val::FuncRef(None) => Value::FuncRef(None),
            Val::FuncRef(Some(func)) => Value::FuncRef(Some(Func::from_wasmtime(store, *func)?)),
            Val::ExternRef(None) => Value::ExternRef(None),
            Val::ExternRef(Some(r)) => {
                let object = r
                    .data(&*store)?
                    .downcast_ref::<ObjectRef>()
                    .copied()
                    .ok_or(UsageError::ForeignExternRef)?;
                Value::ExternRef(Some(object))
            }
            other => {
                return Err(UsageError::UnsupportedType(format!("{other:?}")).into());
            }
        })
    }
}

/// Allocates an `externref` carrying `object`, collecting garbage once if
/// the GC heap is full.
fn extern_ref(
    store: &mut StoreContextMut<'_, ContextData>,
    object: ObjectRef,
) -> Result<Rooted<ExternRef>> {
    match ExternRef::new(&mut *store, object) {
        Ok(r) => Ok(r),
        Err(e) if e.is::<GcHeapOutOfMemory<ObjectRef>>() => {
            log::debug!("GC heap is full; collecting before allocating an externref");
            store.gc();
            Ok(ExternRef::new(&mut *store, object)?)
        }
        Err(e) => Err(e.into()),
    }
}

macro_rules! from_host {
    ($($ty:ty => |$v:ident| $e:expr,)*) => ($(
        impl From<$ty> for Value {
            fn from($v: $ty) -> Value {
                $e
            }
        }
    )*)
}

from_host! {
    i32 => |v| Value::I32(v),
    i64 => |v| Value::I64(v),
    f32 => |v| Value::F32(v.to_bits()),
    f64 => |v| Value::F64(v.to_bits()),
    V128 => |v| Value::V128(v),
    Func => |v| Value::FuncRef(Some(v)),
    Option<Func> => |v| Value::FuncRef(v),
    ObjectRef => |v| Value::ExternRef(Some(v)),
    Option<ObjectRef> => |v| Value::ExternRef(v),
}
