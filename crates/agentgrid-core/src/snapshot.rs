//! Single-writer / multi-reader snapshot cell.
//!
//! Writers build a complete value off to the side and swap it in whole;
//! readers clone the inner `Arc` and never observe a partial update. The
//! lock is only held for the pointer copy.

use std::sync::{Arc, RwLock};

#[derive(Debug)]
pub struct Snapshot<T> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(value))),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the published value.
    pub fn store(&self, value: T) {
        self.store_arc(Arc::new(value));
    }

    pub fn store_arc(&self, value: Arc<T>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = value;
    }
}
