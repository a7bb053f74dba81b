//! Scoped single-holder locks serializing writers to each durable artifact.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Named FIFO single-holder async lock guarding the writer state of one
/// durable artifact.
///
/// Each artifact (store document, journal segment, audit file) owns one of
/// these; every mutation acquires it first. Waiters are served in arrival
/// order (tokio's `Mutex` is fair). The guard releases on drop, so every exit
/// path — including `?` returns — pairs the acquire with a release.
///
/// No reentrancy and no timeouts at this layer; deadlines are the caller's
/// concern.
#[derive(Debug)]
pub struct ScopedMutex<T = ()> {
    name: Arc<str>,
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for ScopedMutex<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

/// RAII guard for a [`ScopedMutex`]; dereferences to the guarded state.
#[derive(Debug)]
pub struct ScopedGuard<'a, T> {
    name: &'a str,
    guard: MutexGuard<'a, T>,
}

impl<T> ScopedMutex<T> {
    /// Create a lock identified by `name` in trace output.
    pub fn new(name: impl Into<String>, state: T) -> Self {
        Self {
            name: Arc::from(name.into()),
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Suspend until the lock is held.
    pub async fn acquire(&self) -> ScopedGuard<'_, T> {
        let guard = self.inner.lock().await;
        trace!(lock = %self.name, "acquired");
        ScopedGuard {
            name: &self.name,
            guard,
        }
    }

    /// The lock's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Deref for ScopedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ScopedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ScopedGuard<'_, T> {
    fn drop(&mut self) {
        trace!(lock = %self.name, "released");
    }
}
