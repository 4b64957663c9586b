use tokio::sync::watch;

/// One-shot signal. The first `resolve` wins; later calls are ignored.
#[derive(Debug)]
pub struct Resolvable<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Resolvable<T> {
    /// Unresolved signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Resolve with `value`. Returns false if already resolved.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// True once resolved.
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait for resolution.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        let Ok(slot) = rx.wait_for(Option::is_some).await else {
            unreachable!("sender is owned by self and outlives this borrow");
        };
        let Some(value) = slot.clone() else {
            unreachable!("wait_for only returns once the slot is populated");
        };
        value
    }
}

impl<T: Clone> Default for Resolvable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn resolves_exactly_once() {
        let signal = Resolvable::new();
        assert!(!signal.is_resolved());

        assert!(signal.resolve(1));
        assert!(!signal.resolve(2));
        assert_eq!(signal.wait().await, 1);
    }

    #[tokio::test]
    async fn wait_wakes_on_resolve() {
        let signal = Arc::new(Resolvable::<Result<(), String>>::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.resolve(Err("aborted".to_string()));

        assert_eq!(waiter.await.unwrap(), Err("aborted".to_string()));
    }
}
