use crate::{Func, ObjectRef, Result, UsageError, V128};
use core::any::TypeId;
use core::fmt;
use std::sync::OnceLock;
use wasmtime::{HeapType, ValType};

/// The kind of a WebAssembly value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    /// A 32-bit integer.
    I32,
    /// A 64-bit integer.
    I64,
    /// A 32-bit float.
    F32,
    /// A 64-bit float.
    F64,
    /// A 128-bit vector.
    V128,
    /// A nullable function reference.
    FuncRef,
    /// A nullable reference to a host object.
    ExternRef,
}

impl ValueKind {
    /// Every kind, in declaration order.
    pub const ALL: [ValueKind; 7] = [
        ValueKind::I32,
        ValueKind::I64,
        ValueKind::F32,
        ValueKind::F64,
        ValueKind::V128,
        ValueKind::FuncRef,
        ValueKind::ExternRef,
    ];

    /// Returns the kind host values of type `T` are marshaled as, or `None`
    /// if `T` has no wasm representation.
    ///
    /// The supported host types are `i32`, `i64`, `f32`, `f64`, [`V128`],
    /// [`Func`] and [`ObjectRef`], the latter two either bare or wrapped in
    /// `Option`. Everything else, including unsigned integers, is
    /// unsupported.
    ///
    /// ```
    /// use wasmtime_bind::{Func, ValueKind};
    ///
    /// assert_eq!(ValueKind::of::<i64>(), Some(ValueKind::I64));
    /// assert_eq!(ValueKind::of::<Option<Func>>(), Some(ValueKind::FuncRef));
    /// assert_eq!(ValueKind::of::<u32>(), None);
    /// ```
    pub fn of<T: ?Sized + 'static>() -> Option<ValueKind> {
        ValueKind::of_type_id(TypeId::of::<T>())
    }

    /// Same as [`ValueKind::of`] for a type only known by its [`TypeId`].
    pub fn of_type_id(id: TypeId) -> Option<ValueKind> {
        registry()
            .iter()
            .find(|(ty, _)| *ty == id)
            .map(|(_, kind)| *kind)
    }

    /// Whether this is a numeric or vector kind.
    pub fn is_num(&self) -> bool {
        !self.is_ref()
    }

    /// Whether this is a reference kind.
    pub fn is_ref(&self) -> bool {
        matches!(self, ValueKind::FuncRef | ValueKind::ExternRef)
    }

    pub(crate) fn to_val_type(self) -> ValType {
        match self {
            ValueKind::I32 => ValType::I32,
            ValueKind::I64 => ValType::I64,
            ValueKind::F32 => ValType::F32,
            ValueKind::F64 => ValType::F64,
            ValueKind::V128 => ValType::V128,
            ValueKind::FuncRef => ValType::FUNCREF,
            ValueKind::ExternRef => ValType::EXTERNREF,
        }
    }

    pub(crate) fn from_val_type(ty: &ValType) -> Result<ValueKind> {
        #[allow(
            unreachable_patterns,
            reason = "the set of wasm types grows with new proposals"
        )]
        let kind = match ty {
            ValType::I32 => ValueKind::I32,
            ValType::I64 => ValueKind::I64,
            ValType::F32 => ValueKind::F32,
            ValType::F64 => ValueKind::F64,
            ValType::V128 => ValueKind::V128,
            ValType::Ref(r) => match r.heap_type() {
                HeapType::Func | HeapType::ConcreteFunc(_) | HeapType::NoFunc => {
                    ValueKind::FuncRef
                }
                HeapType::Extern | HeapType::NoExtern => ValueKind::ExternRef,
                _ => return Err(UsageError::UnsupportedType(format!("{ty:?}")).into()),
            },
            _ => return Err(UsageError::UnsupportedType(format!("{ty:?}")).into()),
        };
        Ok(kind)
    }
}

fn registry() -> &'static [(TypeId, ValueKind)] {
    static REGISTRY: OnceLock<[(TypeId, ValueKind); 9]> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        [
            (TypeId::of::<i32>(), ValueKind::I32),
            (TypeId::of::<i64>(), ValueKind::I64),
            (TypeId::of::<f32>(), ValueKind::F32),
            (TypeId::of::<f64>(), ValueKind::F64),
            (TypeId::of::<V128>(), ValueKind::V128),
            (TypeId::of::<Func>(), ValueKind::FuncRef),
            (TypeId::of::<Option<Func>>(), ValueKind::FuncRef),
            (TypeId::of::<ObjectRef>(), ValueKind::ExternRef),
            (TypeId::of::<Option<ObjectRef>>(), ValueKind::ExternRef),
        ]
    })
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::V128 => "v128",
            ValueKind::FuncRef => "funcref",
            ValueKind::ExternRef => "externref",
        })
    }
}
