use tokio::sync::{Mutex, MutexGuard};

/// Async mutual-exclusion lock.
///
/// Totally orders every read-modify-write of the guarded state. The guard
/// may be held across `.await` points (unlike `std::sync::Mutex`), which is
/// what lets a ratchet rotation persist its new state before any other
/// send or receive observes it.
#[derive(Debug, Default)]
pub struct Lock<T> {
    inner: Mutex<T>,
}

impl<T> Lock<T> {
    /// Create a lock guarding `value`.
    pub fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    /// Acquire the lock. `reason` is recorded at trace level to make lock
    /// contention visible in logs.
    pub async fn acquire(&self, reason: &'static str) -> MutexGuard<'_, T> {
        tracing::trace!(reason, "acquiring lock");
        let guard = self.inner.lock().await;
        tracing::trace!(reason, "lock acquired");
        guard
    }

    /// Acquire without waiting. `None` if currently held.
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }
}
