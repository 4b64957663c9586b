//! Storage wrapper that injects write failures.
//!
//! Wraps any [`Storage`] and fails `store_*` calls at a configured rate. A
//! failed commit writes none of its records.
//! Loads always succeed, so a test can inspect what actually reached the
//! inner storage after a run.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use castle_core::{Commit, HandshakeState, RatchetRecord, SessionId, Storage, StorageError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Chaotic storage wrapper.
///
/// Clones share the RNG and counters, like clones of the inner storage share
/// its records.
#[derive(Clone)]
pub struct ChaoticStorage<S: Storage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaCha8Rng>>,
    enabled: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl<S: Storage> ChaoticStorage<S> {
    /// Wrap `inner`, failing writes with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            enabled: Arc::new(AtomicBool::new(true)),
            writes: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying storage.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Stop or resume failure injection.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Write attempts so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Writes that were failed on purpose.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn inject(&self) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let fail =
            self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(self.failure_rate);
        if fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn load_handshake(
        &self,
        session_id: SessionId,
    ) -> Result<Option<HandshakeState>, StorageError> {
        self.inner.load_handshake(session_id)
    }

    fn store_handshake(
        &self,
        session_id: SessionId,
        state: &HandshakeState,
    ) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.store_handshake(session_id, state)
    }

    fn load_ratchet(&self, session_id: SessionId) -> Result<Option<RatchetRecord>, StorageError> {
        self.inner.load_ratchet(session_id)
    }

    fn store_ratchet(
        &self,
        session_id: SessionId,
        record: &RatchetRecord,
    ) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.store_ratchet(session_id, record)
    }

    fn load_outgoing(&self, session_id: SessionId) -> Result<Vec<Vec<u8>>, StorageError> {
        self.inner.load_outgoing(session_id)
    }

    fn store_outgoing(
        &self,
        session_id: SessionId,
        packets: &[Vec<u8>],
    ) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.store_outgoing(session_id, packets)
    }

    fn store_commit(&self, session_id: SessionId, commit: Commit<'_>) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.store_commit(session_id, commit)
    }

    fn clear(&self, session_id: SessionId) -> Result<(), StorageError> {
        self.inner.clear(session_id)
    }
}

#[cfg(test)]
mod tests {
    use castle_core::MemoryStorage;

    use super::*;

    #[test]
    fn zero_rate_never_fails() {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, 1);
        for _ in 0..100 {
            storage.store_outgoing(SessionId(1), &[vec![1]]).unwrap();
        }
        assert_eq!(storage.writes(), 100);
        assert_eq!(storage.failures(), 0);
    }

    #[test]
    fn full_rate_always_fails_until_disabled() {
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 1.0, 1);
        assert!(storage.store_outgoing(SessionId(1), &[vec![1]]).is_err());
        assert!(storage.inner().load_outgoing(SessionId(1)).unwrap().is_empty());

        storage.set_enabled(false);
        storage.store_outgoing(SessionId(1), &[vec![1]]).unwrap();
        assert_eq!(storage.load_outgoing(SessionId(1)).unwrap(), vec![vec![1]]);
    }
}
