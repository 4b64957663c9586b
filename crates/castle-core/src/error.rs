//! Error types for the Castle session core.
//!
//! Strongly-typed errors for each layer: handshake failures (fatal to the
//! session), per-frame failures (fatal to one `send`/`receive` call only),
//! transport and storage failures.
//!
//! Ordering anomalies (replays, duplicates, reorder-window overflow, stale
//! instances) and ratchet anomalies are absorbed and logged by the session;
//! they never surface here.

use castle_crypto::CryptoError;
use thiserror::Error;

use crate::storage::StorageError;

/// Failures while establishing the shared initial secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Sealed box could not be opened with our encryption key pair
    #[error("could not open initial secret: {0}")]
    OpenFailed(CryptoError),

    /// Opened secret was not signed by the remote signing key
    #[error("initial secret signature invalid")]
    SignatureInvalid,

    /// Recovered secret has the wrong length (e.g. a signed payload opened
    /// without knowing the signer's key)
    #[error("initial secret has invalid length {length}")]
    InvalidSecret {
        /// Length of the recovered bytes
        length: usize,
    },

    /// Could not seal the secret to the remote encryption key
    #[error("could not seal initial secret: {0}")]
    SealFailed(CryptoError),

    /// Persisted handshake state is inconsistent
    #[error("corrupt handshake state: {0}")]
    CorruptState(String),

    /// Session was aborted before the handshake finished
    #[error("handshake aborted")]
    Aborted,

    /// Handshake state could not be persisted or loaded
    #[error("handshake storage: {0}")]
    Storage(String),
}

/// Transport collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport has been aborted and accepts no more packets
    #[error("transport closed")]
    Closed,

    /// Delivery failed; the packet stays queued for the next flush
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Errors returned by session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Initial secret could not be established
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Frame failed AEAD authentication (tampered, wrong key or forged)
    #[error("frame authentication failed")]
    Authentication,

    /// Packet or frame could not be parsed
    #[error("malformed packet: {reason}")]
    Malformed {
        /// What was wrong
        reason: String,
    },

    /// Frame sealed under a ratchet generation we hold no keys for
    #[error("unknown ratchet generation {generation} (current {current})")]
    UnknownGeneration {
        /// Generation named in the packet header
        generation: u32,
        /// Our current generation
        current: u32,
    },

    /// Packet kind does not match this session's variant
    #[error("unexpected packet kind {kind:#04x}")]
    UnexpectedPacket {
        /// Kind byte received
        kind: u8,
    },

    /// Session has been aborted
    #[error("session aborted")]
    Aborted,

    /// Outgoing message id space exhausted
    #[error("message id overflow")]
    Overflow,

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Primitive failure not covered above
    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl SessionError {
    /// Returns true if the session cannot continue after this error.
    ///
    /// Handshake failures and aborts end the session. Frame authentication,
    /// malformed packets and unknown generations affect one frame only;
    /// transport and storage failures may succeed on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Aborted | Self::Overflow)
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => Self::Authentication,
            CryptoError::Malformed { reason } => Self::Malformed { reason },
            other => Self::Crypto(other),
        }
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<StorageError> for HandshakeError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
