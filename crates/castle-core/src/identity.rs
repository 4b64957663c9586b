//! Identity collaborators.
//!
//! Long-term keys are owned by the caller's identity objects. Sessions only
//! read them, and every accessor is async because real implementations may
//! back them with a key directory lookup or a secure enclave.

use std::fmt;

use async_trait::async_trait;
use castle_crypto::{EncryptionKeyPair, PublicEncryptionKey, PublicSigningKey, SigningKeyPair};
use serde::{Deserialize, Serialize};

/// Stable name of a party, used to key delivered messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The local party.
#[async_trait]
pub trait LocalIdentity: Send + Sync {
    /// Our name.
    fn peer_id(&self) -> PeerId;

    /// Long-term signing key pair. `None` if this identity does not sign
    /// (the initial secret is then sealed unsigned).
    async fn signing_key_pair(&self) -> Option<SigningKeyPair>;

    /// Long-term encryption key pair.
    async fn encryption_key_pair(&self) -> EncryptionKeyPair;
}

/// The remote party.
#[async_trait]
pub trait RemoteIdentity: Send + Sync {
    /// Their name.
    fn peer_id(&self) -> PeerId;

    /// Their long-term encryption public key.
    async fn public_encryption_key(&self) -> PublicEncryptionKey;

    /// Their long-term signing public key. `None` if unknown, in which case
    /// the initial secret is accepted without signature verification.
    async fn public_signing_key(&self) -> Option<PublicSigningKey>;
}
