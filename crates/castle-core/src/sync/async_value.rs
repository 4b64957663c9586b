use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

/// Versioned value that tasks can observe and wait on.
///
/// Every `set` bumps the version by one, so a reader can tell that
/// the value changed even if it was replaced by an equal value.
#[derive(Debug)]
pub struct AsyncValue<T> {
    tx: watch::Sender<T>,
    version: AtomicU64,
}

impl<T> AsyncValue<T> {
    /// New value at version 0.
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self { tx, version: AtomicU64::new(0) }
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replace the value, returning the new version.
    pub fn set(&self, value: T) -> u64 {
        self.tx.send_replace(value);
        self.bump()
    }

    /// Wait until `predicate` holds and return a clone of the value that
    /// satisfied it.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&T) -> bool) -> T
    where
        T: Clone,
    {
        let mut rx = self.tx.subscribe();
        let Ok(value) = rx.wait_for(|value| predicate(value)).await else {
            unreachable!("sender is owned by self and outlives this borrow");
        };
        value.clone()
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl<T: Default> Default for AsyncValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn set_bumps_version_even_for_equal_values() {
        let value = AsyncValue::new(1);
        assert_eq!(value.version(), 0);

        assert_eq!(value.set(1), 1);
        assert_eq!(value.set(2), 2);
        assert_eq!(value.version(), 2);
        assert_eq!(value.wait_for(|v| *v == 2).await, 2);
    }

    #[tokio::test]
    async fn wait_for_sees_later_update() {
        let value = Arc::new(AsyncValue::new(None::<Vec<u8>>));
        let waiter = {
            let value = Arc::clone(&value);
            tokio::spawn(async move { value.wait_for(Option::is_some).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        value.set(Some(vec![1, 2, 3]));

        assert_eq!(waiter.await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn wait_for_returns_immediately_when_satisfied() {
        let value = AsyncValue::new(5);
        assert_eq!(value.wait_for(|v| *v == 5).await, 5);
    }
}
