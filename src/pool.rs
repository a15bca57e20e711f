//! Object pool for hot-path allocations.
//!
//! Requests are acquired and released once per NOTIFY frame; reusing
//! them keeps their internal `Vec` capacity across streams. The pool is
//! a bounded free list behind a mutex, shared by every connection in the
//! process, handing out [`Pooled`] guards that reset and return the
//! object on drop.
//!
//! The drop-guard makes the release side of the acquire/release pair
//! unconditional: every exit path, including a panicking handler,
//! returns the object exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

/// Reset an object before it goes back to the free list.
pub trait Reset {
    /// Clear per-use state, keeping reusable capacity.
    fn reset(&mut self);
}

/// A bounded free list of reusable objects.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    max_idle: usize,
}

impl<T: Default + Reset> Pool<T> {
    /// Create a pool keeping at most `max_idle` idle objects.
    pub const fn new(max_idle: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take an object from the pool, or build a fresh one.
    pub fn acquire(&'static self) -> Pooled<T> {
        let value = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();
        Pooled {
            value: Some(value),
            pool: self,
        }
    }

    fn release(&self, mut value: T) {
        value.reset();
        let mut items = self
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if items.len() < self.max_idle {
            items.push(value);
        }
        // Over capacity: dropped, the allocator takes it back.
    }

    /// Number of idle objects currently held.
    pub fn idle(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Guard owning a pooled object; returns it on drop.
pub struct Pooled<T: Default + Reset + 'static> {
    value: Option<T>,
    pool: &'static Pool<T>,
}

impl<T: Default + Reset> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("pooled value taken")
    }
}

impl<T: Default + Reset> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("pooled value taken")
    }
}

impl<T: Default + Reset> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}
