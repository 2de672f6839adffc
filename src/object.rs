use crate::context::ContextId;
use crate::{AsContext, AsContextMut, Error, Result, UsageError};
use core::any::Any;
use std::sync::Arc;

/// A handle to a host object owned by a context, passed to guest code as an
/// `externref`.
///
/// The context keeps the only strong reference to the object in an arena.
/// The handle is an (index, generation) pair into that arena, so a handle
/// that outlives [`ObjectRef::release`] or its context is detected on every
/// use rather than resolving to a different object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    context: ContextId,
    index: u32,
    generation: u32,
}

impl ObjectRef {
    /// Moves `value` into the context and returns a handle to it.
    pub fn new<T>(mut cx: impl AsContextMut, value: T) -> Result<ObjectRef>
    where
        T: Any + Send + Sync,
    {
        let mut store = cx.store_context_mut()?;
        let data = store.data_mut();
        let id = data.id();
        Ok(data.objects.insert(id, Arc::new(value)))
    }

    /// Returns the object.
    pub fn data(&self, cx: impl AsContext) -> Result<Arc<dyn Any + Send + Sync>> {
        let store = cx.store_context()?;
        let data = store.data();
        data.check_owner(self.context, "host object")?;
        data.objects.get(*self).cloned()
    }

    /// Returns the object as a `T`.
    pub fn downcast<T>(&self, cx: impl AsContext) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.data(cx)?
            .downcast::<T>()
            .map_err(|_| UsageError::ObjectType(core::any::type_name::<T>()).into())
    }

    /// Drops the context's reference to the object. Later uses of this
    /// handle, and of copies of it, fail.
    pub fn release(&self, mut cx: impl AsContextMut) -> Result<()> {
        let mut store = cx.store_context_mut()?;
        let data = store.data_mut();
        data.check_owner(self.context, "host object")?;
        data.objects.remove(*self).map(drop)
    }
}

/// The arena of host objects owned by one context.
#[derive(Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

struct Slot {
    generation: u32,
    value: Option<Arc<dyn Any + Send + Sync>>,
}

impl ObjectTable {
    fn insert(&mut self, context: ContextId, value: Arc<dyn Any + Send + Sync>) -> ObjectRef {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.value.is_none());
                slot.value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX)
            }
        };
        ObjectRef {
            context,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn get(&self, object: ObjectRef) -> Result<&Arc<dyn Any + Send + Sync>> {
        self.slots
            .get(object.index as usize)
            .filter(|slot| slot.generation == object.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(Error::Disposed("host object"))
    }

    /// Fails unless `object` names a live entry of this table.
    pub(crate) fn check(&self, object: ObjectRef) -> Result<()> {
        self.get(object).map(drop)
    }

    fn remove(&mut self, object: ObjectRef) -> Result<Arc<dyn Any + Send + Sync>> {
        self.check(object)?;
        let slot = &mut self.slots[object.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(object.index);
        slot.value.take().ok_or(Error::Disposed("host object"))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

impl ObjectRef {
    pub(crate) fn context(&self) -> ContextId {
        self.context
    }
}
