//! Storage abstraction for session state
//!
//! Trait-based abstraction for persisting handshake state, ratchet state and
//! the outgoing packet queue. The trait is synchronous (no async) so session
//! code can persist while holding its state lock without extra suspension
//! points.
//!
//! Records are keyed by [`SessionId`]. A session constructed again with the
//! same id picks up where the previous one stopped: the stored secret skips
//! the key exchange, the ratchet resumes at its generation and watermark,
//! and unconfirmed packets are re-sent.
//!
//! A stored secret is never expired by the session. Callers that stop
//! trusting a channel retire it with [`Storage::clear`].

mod error;
mod memory;

pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Serialize, de::DeserializeOwned};

use crate::{handshake::HandshakeState, ids::SessionId, ratchet::RatchetRecord};

/// Storage abstraction for session state
///
/// Must be Clone (shared between a session and its transport adapter), Send
/// + Sync (thread-safe), and synchronous (no async methods). Implementations
/// typically share internal state via Arc, so clones access the same
/// underlying storage.
///
/// Every `store_*` call replaces the previous record atomically: readers see
/// either the old record or the new one, never a mix.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Load the handshake state. `None` if the session was never started.
    fn load_handshake(&self, session_id: SessionId)
    -> Result<Option<HandshakeState>, StorageError>;

    /// Store the handshake state, overwriting any previous record.
    fn store_handshake(
        &self,
        session_id: SessionId,
        state: &HandshakeState,
    ) -> Result<(), StorageError>;

    /// Load the ratchet state together with its incoming buffer.
    fn load_ratchet(&self, session_id: SessionId) -> Result<Option<RatchetRecord>, StorageError>;

    /// Store the ratchet state together with its incoming buffer.
    fn store_ratchet(&self, session_id: SessionId, record: &RatchetRecord)
    -> Result<(), StorageError>;

    /// Load unconfirmed outgoing packets, front first. Empty if none.
    fn load_outgoing(&self, session_id: SessionId) -> Result<Vec<Vec<u8>>, StorageError>;

    /// Replace the unconfirmed outgoing packets.
    fn store_outgoing(&self, session_id: SessionId, packets: &[Vec<u8>])
    -> Result<(), StorageError>;

    /// Write session state and the outgoing queue in one atomic step.
    ///
    /// Either every record of the commit is replaced or none is. Sessions
    /// use this whenever a state change and the packets it produced must
    /// survive a crash together.
    fn store_commit(&self, session_id: SessionId, commit: Commit<'_>) -> Result<(), StorageError>;

    /// Remove every record of a session.
    ///
    /// The next session constructed with this id performs a fresh key
    /// exchange.
    fn clear(&self, session_id: SessionId) -> Result<(), StorageError>;
}

/// Records written together by [`Storage::store_commit`].
///
/// `outgoing` is the whole queue after the commit, not only the new packets.
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    /// Handshake state, if it changed
    pub handshake: Option<&'a HandshakeState>,
    /// Ratchet record, if it changed
    pub ratchet: Option<&'a RatchetRecord>,
    /// Unconfirmed outgoing packets, front first
    pub outgoing: &'a [Vec<u8>],
}

/// Encode a record as CBOR.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decode a CBOR record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(ciborium::from_reader(bytes)?)
}
