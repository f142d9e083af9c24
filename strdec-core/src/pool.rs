//! Reusable-object pools.
//!
//! The live player decodes at 30 fps with rasters upwards of a megabyte, so
//! decoded-frame containers are drawn from a free list instead of allocated
//! per frame. Containers are owned exclusively by whoever holds them: the
//! borrower during processing, the pool while idle.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// An unbounded free-list pool.
pub struct ObjectPool<T> {
    available: VecDeque<T>,
    factory: Box<dyn Fn() -> T + Send>,
    total_allocated: usize,
}

impl<T> ObjectPool<T> {
    /// Create a pool that allocates through `factory` when empty.
    pub fn new(factory: impl Fn() -> T + Send + 'static) -> Self {
        Self {
            available: VecDeque::new(),
            factory: Box::new(factory),
            total_allocated: 0,
        }
    }

    /// Take an object from the free list, allocating if none is available.
    pub fn borrow(&mut self) -> T {
        if let Some(obj) = self.available.pop_front() {
            obj
        } else {
            self.total_allocated += 1;
            (self.factory)()
        }
    }

    /// Return an object to the free list.
    pub fn give_back(&mut self, obj: T) {
        self.available.push_back(obj);
    }

    /// Number of idle objects in the pool.
    pub fn available(&self) -> usize {
        self.available.len()
    }

    /// Total objects ever allocated by this pool.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }
}

/// A thread-safe pool shared between the player's reader and presentation
/// threads.
pub struct SharedObjectPool<T> {
    inner: Arc<Mutex<ObjectPool<T>>>,
}

impl<T> SharedObjectPool<T> {
    /// Create a new shared pool.
    pub fn new(factory: impl Fn() -> T + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ObjectPool::new(factory))),
        }
    }

    /// Take an object from the pool.
    pub fn borrow(&self) -> T {
        self.inner.lock().borrow()
    }

    /// Return an object to the pool.
    pub fn give_back(&self, obj: T) {
        self.inner.lock().give_back(obj);
    }

    /// Number of idle objects.
    pub fn available(&self) -> usize {
        self.inner.lock().available()
    }
}

impl<T> Clone for SharedObjectPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
