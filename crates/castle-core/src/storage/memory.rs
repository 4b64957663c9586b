use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use super::{Commit, Storage, StorageError, decode, encode};
use crate::{handshake::HandshakeState, ids::SessionId, ratchet::RatchetRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RecordKind {
    Handshake,
    Ratchet,
    Outgoing,
}

/// In-memory storage for tests and embedders without durable state
///
/// Records are held as CBOR bytes, so every load exercises the same
/// encode/decode path a durable backend would. All state is wrapped in
/// `Arc<Mutex<>>`; clones share it.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<(SessionId, RecordKind), Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with at least one record.
    pub fn session_count(&self) -> usize {
        let records = self.records();
        let mut sessions: Vec<SessionId> = records.keys().map(|(id, _)| *id).collect();
        sessions.sort_unstable();
        sessions.dedup();
        sessions.len()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<(SessionId, RecordKind), Vec<u8>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_raw(&self, session_id: SessionId, kind: RecordKind) -> Option<Vec<u8>> {
        self.records().get(&(session_id, kind)).cloned()
    }

    fn store_raw(&self, session_id: SessionId, kind: RecordKind, bytes: Vec<u8>) {
        self.records().insert((session_id, kind), bytes);
    }
}

impl Storage for MemoryStorage {
    fn load_handshake(
        &self,
        session_id: SessionId,
    ) -> Result<Option<HandshakeState>, StorageError> {
        self.load_raw(session_id, RecordKind::Handshake).map(|bytes| decode(&bytes)).transpose()
    }

    fn store_handshake(
        &self,
        session_id: SessionId,
        state: &HandshakeState,
    ) -> Result<(), StorageError> {
        self.store_raw(session_id, RecordKind::Handshake, encode(state)?);
        Ok(())
    }

    fn load_ratchet(&self, session_id: SessionId) -> Result<Option<RatchetRecord>, StorageError> {
        self.load_raw(session_id, RecordKind::Ratchet).map(|bytes| decode(&bytes)).transpose()
    }

    fn store_ratchet(
        &self,
        session_id: SessionId,
        record: &RatchetRecord,
    ) -> Result<(), StorageError> {
        self.store_raw(session_id, RecordKind::Ratchet, encode(record)?);
        Ok(())
    }

    fn load_outgoing(&self, session_id: SessionId) -> Result<Vec<Vec<u8>>, StorageError> {
        match self.load_raw(session_id, RecordKind::Outgoing) {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    fn store_outgoing(
        &self,
        session_id: SessionId,
        packets: &[Vec<u8>],
    ) -> Result<(), StorageError> {
        self.store_raw(session_id, RecordKind::Outgoing, encode(&packets)?);
        Ok(())
    }

    fn store_commit(&self, session_id: SessionId, commit: Commit<'_>) -> Result<(), StorageError> {
        // Encode everything before touching the map so a failure writes nothing
        let handshake = commit.handshake.map(encode).transpose()?;
        let ratchet = commit.ratchet.map(encode).transpose()?;
        let outgoing = encode(&commit.outgoing)?;

        let mut records = self.records();
        if let Some(bytes) = handshake {
            records.insert((session_id, RecordKind::Handshake), bytes);
        }
        if let Some(bytes) = ratchet {
            records.insert((session_id, RecordKind::Ratchet), bytes);
        }
        records.insert((session_id, RecordKind::Outgoing), outgoing);
        Ok(())
    }

    fn clear(&self, session_id: SessionId) -> Result<(), StorageError> {
        self.records().retain(|(id, _), _| *id != session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: SessionId = SessionId(7);

    #[test]
    fn handshake_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load_handshake(SESSION).unwrap(), None);

        let mut state = HandshakeState::new(true);
        state.initial_secret = Some(vec![9; 32]);
        storage.store_handshake(SESSION, &state).unwrap();

        assert_eq!(storage.load_handshake(SESSION).unwrap(), Some(state));
    }

    #[test]
    fn outgoing_defaults_to_empty() {
        let storage = MemoryStorage::new();
        assert!(storage.load_outgoing(SESSION).unwrap().is_empty());

        storage.store_outgoing(SESSION, &[vec![1], vec![2, 3]]).unwrap();
        assert_eq!(storage.load_outgoing(SESSION).unwrap(), vec![vec![1], vec![2, 3]]);
    }

    #[test]
    fn clones_share_state() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        clone.store_outgoing(SESSION, &[vec![1]]).unwrap();

        assert_eq!(storage.load_outgoing(SESSION).unwrap().len(), 1);
    }

    #[test]
    fn clear_removes_only_that_session() {
        let storage = MemoryStorage::new();
        let other = SessionId(8);
        storage.store_handshake(SESSION, &HandshakeState::new(true)).unwrap();
        storage.store_outgoing(SESSION, &[vec![1]]).unwrap();
        storage.store_handshake(other, &HandshakeState::new(false)).unwrap();
        assert_eq!(storage.session_count(), 2);

        storage.clear(SESSION).unwrap();

        assert_eq!(storage.load_handshake(SESSION).unwrap(), None);
        assert!(storage.load_outgoing(SESSION).unwrap().is_empty());
        assert!(storage.load_handshake(other).unwrap().is_some());
        assert_eq!(storage.session_count(), 1);
    }

    #[test]
    fn commit_writes_state_and_queue_together() {
        let storage = MemoryStorage::new();
        let mut state = HandshakeState::new(true);
        state.initial_secret = Some(vec![3; 32]);
        let queue = vec![vec![1], vec![2]];

        storage
            .store_commit(SESSION, Commit { handshake: Some(&state), ratchet: None, outgoing: &queue })
            .unwrap();

        assert_eq!(storage.load_handshake(SESSION).unwrap(), Some(state));
        assert_eq!(storage.load_outgoing(SESSION).unwrap(), queue);
        assert!(storage.load_ratchet(SESSION).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_a_serialization_error() {
        let storage = MemoryStorage::new();
        storage.store_raw(SESSION, RecordKind::Handshake, vec![0xff, 0x00]);

        assert!(matches!(storage.load_handshake(SESSION), Err(StorageError::Serialization(_))));
    }
}
