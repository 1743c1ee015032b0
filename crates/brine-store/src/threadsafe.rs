//! Mutex-guarded wrapper around [`SimpleLru`].
//!
//! One coarse lock serializes every public operation, which is the intended
//! configuration when the storage is shared between server workers. None of
//! the wrapped operations can suspend, so the lock is only ever held for
//! the duration of one map operation.

use parking_lot::Mutex;

use crate::lru::SimpleLru;
use crate::Storage;

/// Thread-safe LRU storage: a [`SimpleLru`] behind a single
/// `parking_lot::Mutex`.
///
/// Operations on the same key are linearizable; operations on distinct keys
/// serialize in lock-acquisition order.
pub struct ThreadSafeLru {
    inner: Mutex<SimpleLru>,
}

impl ThreadSafeLru {
    /// Create a wrapped map with the given byte budget.
    pub fn new(max_bytes: usize) -> Self {
        ThreadSafeLru {
            inner: Mutex::new(SimpleLru::new(max_bytes)),
        }
    }

    /// Combined byte cost of all stored entries.
    pub fn current_bytes(&self) -> usize {
        self.inner.lock().current_bytes()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Storage for ThreadSafeLru {
    fn put(&self, key: &str, value: &[u8]) -> bool {
        self.inner.lock().put(key, value)
    }

    fn put_if_absent(&self, key: &str, value: &[u8]) -> bool {
        self.inner.lock().put_if_absent(key, value)
    }

    fn set(&self, key: &str, value: &[u8]) -> bool {
        self.inner.lock().set(key, value)
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.lock().delete(key)
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().get(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
