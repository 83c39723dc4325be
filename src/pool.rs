//! Fixed-capacity slot pools for GPU resource objects.
//!
//! Each resource kind lives in its own [`Pool`]: a fixed array of slots
//! allocated once at engine startup and never grown or relocated. Callers
//! hold [`Handle`]s (typed slot indices) instead of references, which keeps
//! resource lookup O(1) and lets a slot be reused as soon as its occupant
//! moves into the deferred deletion queue.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{Error, Result};

/// Number of slots per resource kind.
pub const POOL_CAPACITY: usize = 4096;

/// Typed index into a [`Pool`].
///
/// Copyable and cheap; holding one does not keep the resource alive. A handle
/// whose slot has been destroyed simply fails lookups (and destroying it again
/// is a no-op).
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Raw slot index, stable for the lifetime of the resource.
    pub fn index(&self) -> u32 {
        self.index
    }
}

// Manual impls: derives would bound T, but handles are plain indices.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

/// Fixed-capacity slot allocator for one resource kind.
///
/// Insertion scans for the first free slot; exhaustion is fatal for the
/// engine and reported as [`Error::PoolExhausted`]. Removal moves the value
/// out (so the engine can retire it through the deletion queue) and frees the
/// slot for immediate reuse.
pub struct Pool<T> {
    slots: Box<[Option<T>]>,
    len: usize,
    name: &'static str,
}

impl<T> Pool<T> {
    /// Create a pool with [`POOL_CAPACITY`] empty slots. The name labels
    /// exhaustion errors.
    pub fn new(name: &'static str) -> Self {
        let mut slots = Vec::with_capacity(POOL_CAPACITY);
        slots.resize_with(POOL_CAPACITY, || None);
        Self {
            slots: slots.into_boxed_slice(),
            len: 0,
            name,
        }
    }

    /// Place `value` in the first free slot and return its handle.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                self.len += 1;
                return Ok(Handle::new(index as u32));
            }
        }
        Err(Error::PoolExhausted(self.name))
    }

    /// Borrow the resource at `handle`, if the slot is live.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index as usize)?.as_ref()
    }

    /// Mutably borrow the resource at `handle`, if the slot is live.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index as usize)?.as_mut()
    }

    /// Move the resource out of its slot, freeing the slot.
    ///
    /// Returns `None` for out-of-range handles and for slots already freed,
    /// making double-destroy a no-op.
    pub fn take(&mut self, handle: Handle<T>) -> Option<T> {
        let value = self.slots.get_mut(handle.index as usize)?.take();
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots still available.
    pub fn free_count(&self) -> usize {
        POOL_CAPACITY - self.len
    }

    /// Drain every live resource, freeing all slots. Used at shutdown.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.len = 0;
        self.slots.iter_mut().filter_map(|slot| slot.take())
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("capacity", &POOL_CAPACITY)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_take_roundtrip_restores_free_count() {
        let mut pool: Pool<u32> = Pool::new("test");
        let before = pool.free_count();

        let handle = pool.insert(7).unwrap();
        assert_eq!(pool.free_count(), before - 1);
        assert_eq!(pool.get(handle), Some(&7));

        assert_eq!(pool.take(handle), Some(7));
        assert_eq!(pool.free_count(), before);
        assert!(pool.get(handle).is_none());
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut pool: Pool<u32> = Pool::new("test");
        let a = pool.insert(1).unwrap();
        let _b = pool.insert(2).unwrap();

        pool.take(a);
        let c = pool.insert(3).unwrap();
        // First-free scan hands back the lowest freed index.
        assert_eq!(c.index(), a.index());
        assert_eq!(pool.get(c), Some(&3));
    }

    #[test]
    fn test_full_pool_yields_distinct_handles_then_fails() {
        let mut pool: Pool<usize> = Pool::new("test");
        let mut seen = std::collections::HashSet::new();
        for i in 0..POOL_CAPACITY {
            let handle = pool.insert(i).unwrap();
            assert!((handle.index() as usize) < POOL_CAPACITY);
            assert!(seen.insert(handle.index()));
        }
        assert!(matches!(
            pool.insert(0),
            Err(Error::PoolExhausted("test"))
        ));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_double_take_is_noop() {
        let mut pool: Pool<u32> = Pool::new("test");
        let handle = pool.insert(9).unwrap();
        assert_eq!(pool.take(handle), Some(9));
        assert_eq!(pool.take(handle), None);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_out_of_range_handle_is_rejected() {
        let mut pool: Pool<u32> = Pool::new("test");
        let bogus = Handle::new(POOL_CAPACITY as u32 + 10);
        assert!(pool.get(bogus).is_none());
        assert!(pool.take(bogus).is_none());
    }

    #[test]
    fn test_drain_empties_pool() {
        let mut pool: Pool<u32> = Pool::new("test");
        pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        let drained: Vec<u32> = pool.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(pool.is_empty());
        assert_eq!(pool.free_count(), POOL_CAPACITY);
    }
}
