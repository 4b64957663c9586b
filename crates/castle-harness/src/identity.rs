//! Deterministic long-term identities.

use async_trait::async_trait;
use castle_core::{LocalIdentity, PeerId, RemoteIdentity};
use castle_crypto::{EncryptionKeyPair, PublicEncryptionKey, PublicSigningKey, SigningKeyPair};

/// Long-term keys of one party, derived from a seed byte.
#[derive(Clone)]
pub struct TestIdentity {
    name: PeerId,
    signing: Option<SigningKeyPair>,
    encryption: EncryptionKeyPair,
}

impl TestIdentity {
    /// Party that signs its initial secret.
    pub fn new(name: &str, seed: u8) -> Self {
        Self {
            name: PeerId::new(name),
            signing: Some(SigningKeyPair::from_seed(&[seed; 32])),
            encryption: EncryptionKeyPair::from_private_bytes([seed ^ 0x5A; 32]),
        }
    }

    /// Party without a signing key.
    pub fn unsigned(name: &str, seed: u8) -> Self {
        Self { signing: None, ..Self::new(name, seed) }
    }

    /// What the other party knows about us.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            name: self.name.clone(),
            signing: self.signing.as_ref().map(SigningKeyPair::public_key),
            encryption: self.encryption.public_key(),
        }
    }
}

#[async_trait]
impl LocalIdentity for TestIdentity {
    fn peer_id(&self) -> PeerId {
        self.name.clone()
    }

    async fn signing_key_pair(&self) -> Option<SigningKeyPair> {
        self.signing.clone()
    }

    async fn encryption_key_pair(&self) -> EncryptionKeyPair {
        self.encryption.clone()
    }
}

/// Public half of a [`TestIdentity`].
#[derive(Clone)]
pub struct PublicIdentity {
    name: PeerId,
    signing: Option<PublicSigningKey>,
    encryption: PublicEncryptionKey,
}

impl PublicIdentity {
    /// Forget the signing key: signatures are then not verified.
    pub fn without_signing_key(mut self) -> Self {
        self.signing = None;
        self
    }

    /// Claim someone else's signing key, as an impostor would.
    pub fn with_signing_key_of(mut self, other: &TestIdentity) -> Self {
        self.signing = other.signing.as_ref().map(SigningKeyPair::public_key);
        self
    }
}

#[async_trait]
impl RemoteIdentity for PublicIdentity {
    fn peer_id(&self) -> PeerId {
        self.name.clone()
    }

    async fn public_encryption_key(&self) -> PublicEncryptionKey {
        self.encryption
    }

    async fn public_signing_key(&self) -> Option<PublicSigningKey> {
        self.signing
    }
}
