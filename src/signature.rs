use crate::{Result, Value, ValueKind, WasmParams, WasmResults};
use core::any::TypeId;
use core::fmt;
use smallvec::SmallVec;
use wasmtime::FuncType;

/// The maximum number of parameters, and separately of results, that typed
/// access through [`TypedFunc`](crate::TypedFunc) supports. Untyped access
/// has no limit.
pub const MAX_TYPED_ARITY: usize = 7;

/// The parameter and result kinds of a function.
///
/// Signatures are immutable once the function they describe exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Box<[ValueKind]>,
    results: Box<[ValueKind]>,
}

impl Signature {
    /// Creates a signature from its parameter and result kinds.
    pub fn new(
        params: impl IntoIterator<Item = ValueKind>,
        results: impl IntoIterator<Item = ValueKind>,
    ) -> Signature {
        Signature {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// The parameter kinds, in order.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    /// The result kinds, in order.
    pub fn results(&self) -> &[ValueKind] {
        &self.results
    }

    pub(crate) fn from_func_type(ty: &FuncType) -> Result<Signature> {
        Ok(Signature {
            params: ty
                .params()
                .map(|p| ValueKind::from_val_type(&p))
                .collect::<Result<_>>()?,
            results: ty
                .results()
                .map(|r| ValueKind::from_val_type(&r))
                .collect::<Result<_>>()?,
        })
    }

    pub(crate) fn to_func_type(&self, engine: &wasmtime::Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|k| k.to_val_type()),
            self.results.iter().map(|k| k.to_val_type()),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, kinds: &[ValueKind]) -> fmt::Result {
            f.write_str("(")?;
            for (i, kind) in kinds.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{kind}")?;
            }
            f.write_str(")")
        }
        list(f, &self.params)?;
        f.write_str(" -> ")?;
        list(f, &self.results)
    }
}

/// One position of a requested [`Shape`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The position must have exactly this kind.
    Kind(ValueKind),
    /// The dynamic [`Value`] box, which accepts any kind.
    Any,
    /// A host type with no wasm representation. Never matches.
    Unsupported,
}

type Slots = SmallVec<[Slot; MAX_TYPED_ARITY + 1]>;

/// A call shape requested by the host: ordered parameter types and an
/// ordered (possibly empty, possibly tuple-shaped) list of result types.
///
/// Matching against a [`Signature`] is exact: every position must map to
/// the same kind, in order, and the lengths must agree. Value-level
/// promotions such as reading an `i32` result as `i64` are deliberately not
/// applied here. A shape wider than [`MAX_TYPED_ARITY`] never matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    params: Slots,
    results: Slots,
}

impl Shape {
    /// Creates a shape from explicit slots.
    pub fn new(
        params: impl IntoIterator<Item = Slot>,
        results: impl IntoIterator<Item = Slot>,
    ) -> Shape {
        Shape {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// The shape of a typed call with parameters `P` and results `R`.
    pub fn of<P: WasmParams, R: WasmResults>() -> Shape {
        let mut params = Slots::new();
        P::slots(&mut params);
        let mut results = Slots::new();
        R::slots(&mut results);
        Shape { params, results }
    }

    /// Builds a shape from host types known only by their [`TypeId`],
    /// looking each one up in the kind registry.
    pub fn from_type_ids(params: &[TypeId], results: &[TypeId]) -> Shape {
        fn slot(id: &TypeId) -> Slot {
            if *id == TypeId::of::<Value>() {
                return Slot::Any;
            }
            match ValueKind::of_type_id(*id) {
                Some(kind) => Slot::Kind(kind),
                None => Slot::Unsupported,
            }
        }
        Shape {
            params: params.iter().map(slot).collect(),
            results: results.iter().map(slot).collect(),
        }
    }

    /// The parameter slots.
    pub fn params(&self) -> &[Slot] {
        &self.params
    }

    /// The result slots.
    pub fn results(&self) -> &[Slot] {
        &self.results
    }

    /// Whether this shape is narrow enough for typed access.
    pub fn is_supported(&self) -> bool {
        self.params.len() <= MAX_TYPED_ARITY && self.results.len() <= MAX_TYPED_ARITY
    }

    /// Returns whether a function with `signature` can be called with this
    /// shape. A mismatch is not an error: callers fall back to untyped
    /// access.
    pub fn matches(&self, signature: &Signature) -> bool {
        fn same(slots: &[Slot], kinds: &[ValueKind]) -> bool {
            slots.len() == kinds.len()
                && slots.iter().zip(kinds).all(|(slot, kind)| match slot {
                    Slot::Kind(k) => k == kind,
                    Slot::Any => true,
                    Slot::Unsupported => false,
                })
        }
        self.is_supported()
            && same(&self.params, signature.params())
            && same(&self.results, signature.results())
    }

    /// The concrete signature this shape describes, or `None` if some slot
    /// is not a concrete kind.
    pub fn to_signature(&self) -> Option<Signature> {
        fn kinds(slots: &[Slot]) -> Option<Vec<ValueKind>> {
            slots
                .iter()
                .map(|slot| match slot {
                    Slot::Kind(k) => Some(*k),
                    Slot::Any | Slot::Unsupported => None,
                })
                .collect()
        }
        Some(Signature::new(kinds(&self.params)?, kinds(&self.results)?))
    }
}
