use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the latest published value. Readers get a cheap `Arc` clone and the
/// writer replaces the value wholesale, so a reader never sees a partial one.
pub struct LatestSlot<T> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn load(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    pub fn publish(&self, value: Arc<T>) {
        *self.inner.write() = Some(value);
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
