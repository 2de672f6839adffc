use crate::context::{ContextData, ContextId};
use crate::{AsContext, AsContextMut, Error, Func, Position, Result, UsageError, Value, ValueKind};
use std::collections::HashMap;
use wasmtime::{AsContextMut as _, Mutability, Ref, RefType, RootScope, Val, ValType};

/// Something that can be [defined](crate::Context::define) as an import.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Extern {
    /// A function.
    Func(Func),
    /// A global.
    Global(Global),
    /// A table.
    Table(Table),
    /// A linear memory.
    Memory(Memory),
}

macro_rules! extern_from {
    ($($variant:ident)*) => {$(
        impl From<$variant> for Extern {
            fn from(item: $variant) -> Extern {
                Extern::$variant(item)
            }
        }
    )*};
}

extern_from!(Func Global Table Memory);

impl Extern {
    pub(crate) fn to_wasmtime(&self, data: &ContextData) -> Result<wasmtime::Extern> {
        Ok(match self {
            Extern::Func(func) => func.to_wasmtime(data)?.into(),
            Extern::Global(global) => global.resolve(data)?.into(),
            Extern::Table(table) => table.resolve(data)?.into(),
            Extern::Memory(memory) => memory.resolve(data)?.into(),
        })
    }
}

/// The globals, tables or memories a context has handed out handles for.
///
/// An instance export is registered once per `(instance, name)`, so looking
/// the same export up twice gives equal handles.
pub(crate) struct ExternTable<T> {
    items: Vec<T>,
    exports: HashMap<(u32, String), u32>,
}

impl<T> Default for ExternTable<T> {
    fn default() -> ExternTable<T> {
        ExternTable {
            items: Vec::new(),
            exports: HashMap::new(),
        }
    }
}

impl<T: Copy> ExternTable<T> {
    fn push(&mut self, item: T) -> u32 {
        self.items.push(item);
        u32::try_from(self.items.len() - 1).unwrap_or(u32::MAX)
    }

    fn get(&self, index: u32) -> Option<T> {
        self.items.get(index as usize).copied()
    }

    pub(crate) fn exported(&self, instance: u32, name: &str) -> Option<u32> {
        self.exports.get(&(instance, name.to_string())).copied()
    }

    pub(crate) fn push_export(&mut self, instance: u32, name: &str, item: T) -> u32 {
        let index = self.push(item);
        self.exports.insert((instance, name.to_string()), index);
        index
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

fn lookup<T: Copy>(
    data: &ContextData,
    owner: ContextId,
    items: &ExternTable<T>,
    index: u32,
    what: &'static str,
) -> Result<T> {
    data.check_owner(owner, what)?;
    items.get(index).ok_or(Error::Disposed(what))
}

fn coerce(value: Value, kind: ValueKind, op: &'static str) -> Result<Value> {
    value.coerce(kind).map_err(|_| Error::TypeMismatch {
        op,
        position: Position::Param(0),
        expected: kind,
        found: value.kind(),
    })
}

/// The type of a [`Global`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlobalType {
    kind: ValueKind,
    mutable: bool,
}

impl GlobalType {
    /// The kind of value the global holds.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether [`Global::set`] is allowed.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }
}

/// A WebAssembly global variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Global {
    context: ContextId,
    index: u32,
}

impl Global {
    /// Creates a global holding `init`, which is coerced to `kind`.
    pub fn new(
        mut cx: impl AsContextMut,
        kind: ValueKind,
        mutable: bool,
        init: Value,
    ) -> Result<Global> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let init = coerce(init, kind, "Global::new")?.into_val(&mut store)?;
        let mutability = if mutable {
            Mutability::Var
        } else {
            Mutability::Const
        };
        let ty = wasmtime::GlobalType::new(kind.to_val_type(), mutability);
        let global = wasmtime::Global::new(&mut store, ty, init)?;
        Ok(Global::register(store.data_mut(), global))
    }

    pub(crate) fn register(data: &mut ContextData, global: wasmtime::Global) -> Global {
        Global {
            context: data.id(),
            index: data.globals.push(global),
        }
    }

    pub(crate) fn at(context: ContextId, index: u32) -> Global {
        Global { context, index }
    }

    fn resolve(&self, data: &ContextData) -> Result<wasmtime::Global> {
        lookup(data, self.context, &data.globals, self.index, "global")
    }

    /// The type of this global.
    pub fn ty(&self, cx: impl AsContext) -> Result<GlobalType> {
        let store = cx.store_context()?;
        let ty = self.resolve(store.data())?.ty(&store);
        Ok(GlobalType {
            kind: ValueKind::from_val_type(ty.content())?,
            mutable: matches!(ty.mutability(), Mutability::Var),
        })
    }

    /// Reads the current value.
    pub fn get(&self, mut cx: impl AsContextMut) -> Result<Value> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let val = self.resolve(store.data())?.get(&mut store);
        Value::from_val(&mut store, &val)
    }

    /// Replaces the current value. The new value is coerced to the global's
    /// kind.
    pub fn set(&self, mut cx: impl AsContextMut, value: Value) -> Result<()> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let global = self.resolve(store.data())?;
        let ty = global.ty(&store);
        if matches!(ty.mutability(), Mutability::Const) {
            return Err(UsageError::ImmutableGlobal.into());
        }
        let kind = ValueKind::from_val_type(ty.content())?;
        let val = coerce(value, kind, "Global::set")?.into_val(&mut store)?;
        global.set(&mut store, val)?;
        Ok(())
    }
}

/// A WebAssembly table of function or host object references.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Table {
    context: ContextId,
    index: u32,
}

fn ref_type(kind: ValueKind) -> Result<RefType> {
    match kind {
        ValueKind::FuncRef => Ok(RefType::FUNCREF),
        ValueKind::ExternRef => Ok(RefType::EXTERNREF),
        other => Err(UsageError::UnsupportedType(format!("table of {other}")).into()),
    }
}

fn into_ref(val: Val) -> Result<Ref> {
    match val {
        Val::FuncRef(func) => Ok(Ref::Func(func)),
        Val::ExternRef(object) => Ok(Ref::Extern(object)),
        other => Err(UsageError::UnsupportedType(format!("{other:?}")).into()),
    }
}

fn from_ref(r: Ref) -> Result<Val> {
    match r {
        Ref::Func(func) => Ok(Val::FuncRef(func)),
        Ref::Extern(object) => Ok(Val::ExternRef(object)),
        other => Err(UsageError::UnsupportedType(format!("{other:?}")).into()),
    }
}

impl Table {
    /// Creates a table of `kind` elements, each initialized to `init`.
    pub fn new(
        mut cx: impl AsContextMut,
        kind: ValueKind,
        minimum: u32,
        maximum: Option<u32>,
        init: Value,
    ) -> Result<Table> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let element = ref_type(kind)?;
        let init = into_ref(coerce(init, kind, "Table::new")?.into_val(&mut store)?)?;
        let ty = wasmtime::TableType::new(element, minimum, maximum);
        let table = wasmtime::Table::new(&mut store, ty, init)?;
        Ok(Table::register(store.data_mut(), table))
    }

    pub(crate) fn register(data: &mut ContextData, table: wasmtime::Table) -> Table {
        Table {
            context: data.id(),
            index: data.tables.push(table),
        }
    }

    pub(crate) fn at(context: ContextId, index: u32) -> Table {
        Table { context, index }
    }

    fn resolve(&self, data: &ContextData) -> Result<wasmtime::Table> {
        lookup(data, self.context, &data.tables, self.index, "table")
    }

    /// The kind of the table's elements.
    pub fn kind(&self, cx: impl AsContext) -> Result<ValueKind> {
        let store = cx.store_context()?;
        let ty = self.resolve(store.data())?.ty(&store);
        ValueKind::from_val_type(&ValType::Ref(ty.element().clone()))
    }

    /// The number of elements.
    pub fn size(&self, cx: impl AsContext) -> Result<u32> {
        let store = cx.store_context()?;
        Ok(self.resolve(store.data())?.size(&store))
    }

    /// Reads the element at `index`.
    pub fn get(&self, mut cx: impl AsContextMut, index: u32) -> Result<Value> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let table = self.resolve(store.data())?;
        let Some(element) = table.get(&mut store, index) else {
            return Err(Error::OutOfBounds {
                what: "table",
                index: index.into(),
                size: table.size(&store).into(),
            });
        };
        let val = from_ref(element)?;
        Value::from_val(&mut store, &val)
    }

    /// Replaces the element at `index`.
    pub fn set(&self, mut cx: impl AsContextMut, index: u32, value: Value) -> Result<()> {
        let mut store = cx.store_context_mut()?;
        let mut scope = RootScope::new(&mut store);
        let mut store = scope.as_context_mut();
        let table = self.resolve(store.data())?;
        let size = table.size(&store);
        if index >= size {
            return Err(Error::OutOfBounds {
                what: "table",
                index: index.into(),
                size: size.into(),
            });
        }
        let element = table.ty(&store).element().clone();
        let kind = ValueKind::from_val_type(&ValType::Ref(element))?;
        let val = coerce(value, kind, "Table::set")?.into_val(&mut store)?;
        table.set(&mut store, index, into_ref(val)?)?;
        Ok(())
    }
}

/// A WebAssembly linear memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Memory {
    context: ContextId,
    index: u32,
}

impl Memory {
    /// Creates a memory of `minimum` 64 KiB pages, growable up to
    /// `maximum` pages.
    pub fn new(mut cx: impl AsContextMut, minimum: u32, maximum: Option<u32>) -> Result<Memory> {
        let mut store = cx.store_context_mut()?;
        let memory = wasmtime::Memory::new(&mut store, wasmtime::MemoryType::new(minimum, maximum))?;
        Ok(Memory::register(store.data_mut(), memory))
    }

    pub(crate) fn register(data: &mut ContextData, memory: wasmtime::Memory) -> Memory {
        Memory {
            context: data.id(),
            index: data.memories.push(memory),
        }
    }

    pub(crate) fn at(context: ContextId, index: u32) -> Memory {
        Memory { context, index }
    }

    fn resolve(&self, data: &ContextData) -> Result<wasmtime::Memory> {
        lookup(data, self.context, &data.memories, self.index, "memory")
    }

    /// The current size in bytes.
    pub fn data_size(&self, cx: impl AsContext) -> Result<usize> {
        let store = cx.store_context()?;
        Ok(self.resolve(store.data())?.data_size(&store))
    }

    /// Copies `buffer.len()` bytes starting at `offset` into `buffer`.
    pub fn read(&self, cx: impl AsContext, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let store = cx.store_context()?;
        let memory = self.resolve(store.data())?;
        memory
            .read(&store, offset, buffer)
            .map_err(|_| out_of_bounds(offset, memory.data_size(&store)))
    }

    /// Copies `data` into memory starting at `offset`.
    pub fn write(&self, mut cx: impl AsContextMut, offset: usize, data: &[u8]) -> Result<()> {
        let mut store = cx.store_context_mut()?;
        let memory = self.resolve(store.data())?;
        memory
            .write(&mut store, offset, data)
            .map_err(|_| out_of_bounds(offset, memory.data_size(&store)))
    }
}

fn out_of_bounds(offset: usize, size: usize) -> Error {
    Error::OutOfBounds {
        what: "memory",
        index: offset as u64,
        size: size as u64,
    }
}
