//! Key material types.
//!
//! Secret halves zeroize on drop and render as redacted in `Debug` output.
//! All types are serde-serializable so sessions can persist them through the
//! storage collaborator.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of every symmetric and X25519 key in bytes.
pub const KEY_SIZE: usize = 32;

/// 256-bit key for XChaCha20-Poly1305.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// X25519 public key, used both as a long-term encryption key and as a
/// ratchet key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicEncryptionKey([u8; KEY_SIZE]);

impl PublicEncryptionKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub(crate) fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for PublicEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, ..] = self.0;
        write!(f, "PublicEncryptionKey({a:02x}{b:02x}{c:02x}{d:02x}..)")
    }
}

/// X25519 key pair.
///
/// # Invariants
///
/// - `public` is always the X25519 base-point multiple of `private`
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKeyPair {
    private: [u8; KEY_SIZE],
    #[zeroize(skip)]
    public: PublicEncryptionKey,
}

impl EncryptionKeyPair {
    /// Build a key pair from 32 secret bytes (clamping happens inside
    /// X25519).
    pub fn from_private_bytes(private: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicEncryptionKey(*PublicKey::from(&secret).as_bytes());
        Self { private, public }
    }

    /// Public half.
    pub fn public_key(&self) -> PublicEncryptionKey {
        self.public
    }

    pub(crate) fn to_dalek_secret(&self) -> StaticSecret {
        StaticSecret::from(self.private)
    }
}

impl fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

/// Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PublicSigningKey(VerifyingKey);

impl PublicSigningKey {
    /// Parse a compressed Ed25519 point.
    pub fn from_bytes(bytes: &[u8; KEY_SIZE]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey { reason: e.to_string() })
    }

    /// Compressed point bytes.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    pub(crate) fn as_dalek(&self) -> &VerifyingKey {
        &self.0
    }
}

/// Ed25519 key pair. The inner `SigningKey` zeroizes itself on drop.
#[derive(Clone)]
pub struct SigningKeyPair(SigningKey);

impl SigningKeyPair {
    /// Derive a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; KEY_SIZE]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Public half.
    pub fn public_key(&self) -> PublicSigningKey {
        PublicSigningKey(self.0.verifying_key())
    }

    pub(crate) fn as_dalek(&self) -> &SigningKey {
        &self.0
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}
