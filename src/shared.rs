use std::sync::{Arc, Mutex};

/// A small wrapper around Arc<Mutex<T>> so callers never hold a guard across
/// other work. The listener uses this for the state cell shared between the
/// caller's thread and the receive loop.
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> R {
        let guard = self.inner.lock().unwrap();
        f(&guard)
    }

    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> R {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    pub fn set(&self, value: T) {
        self.with_mut(|inner| *inner = value);
    }
}

impl<T: Clone> Shared<T> {
    pub fn get(&self) -> T {
        self.with(|inner| inner.clone())
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
