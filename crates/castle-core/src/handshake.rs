//! Initial secret handshake.
//!
//! Alice draws a random secret, signs it when she has a signing key, and
//! seals it to Bob's long-term encryption key. Bob opens it and, when he
//! knows Alice's signing key, verifies the signature. Any failure on Bob's
//! side is final: there is no fallback to an unauthenticated secret.
//!
//! The persisted [`HandshakeState`] lets a reconstructed session skip the
//! exchange entirely.

use std::fmt;

use castle_crypto::{CryptoError, EXCHANGE_SECRET_LEN, PrimitiveProvider, Zeroizing};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    error::HandshakeError,
    identity::{LocalIdentity, RemoteIdentity},
};

/// Handshake progress. Only ever moves from `Start` to `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeStep {
    /// Nothing sealed or recovered yet
    Start,
    /// Secret established
    Complete,
}

/// Persisted handshake state of one side.
///
/// # Invariants
///
/// - `initial_secret` is set at most once and never overwritten
/// - `current_step` is `Complete` iff `initial_secret` is set
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeState {
    /// True for the initiator
    #[zeroize(skip)]
    pub is_alice: bool,
    /// Progress
    #[zeroize(skip)]
    pub current_step: HandshakeStep,
    /// Shared secret, once known
    pub initial_secret: Option<Vec<u8>>,
    /// Sealed secret: produced by Alice, received by Bob
    pub initial_secret_cyphertext: Option<Vec<u8>>,
}

impl HandshakeState {
    /// State of a session that has not started.
    pub fn new(is_alice: bool) -> Self {
        Self {
            is_alice,
            current_step: HandshakeStep::Start,
            initial_secret: None,
            initial_secret_cyphertext: None,
        }
    }

    /// Shared secret, if established.
    pub fn secret(&self) -> Option<&[u8]> {
        self.initial_secret.as_deref()
    }

    /// True while Bob is still waiting for Alice's sealed secret.
    pub fn awaiting_cyphertext(&self) -> bool {
        !self.is_alice && self.initial_secret.is_none() && self.initial_secret_cyphertext.is_none()
    }

    /// Store the sealed secret received from Alice. Returns false if one is
    /// already held (a duplicate delivery).
    pub fn record_cyphertext(&mut self, cyphertext: &[u8]) -> bool {
        if self.initial_secret_cyphertext.is_some() || self.initial_secret.is_some() {
            return false;
        }
        self.initial_secret_cyphertext = Some(cyphertext.to_vec());
        true
    }

    /// Drop a sealed secret that failed to open, so the next one delivered
    /// is recorded. No effect once the secret is established.
    pub fn discard_cyphertext(&mut self) {
        if self.initial_secret.is_none() {
            self.initial_secret_cyphertext = None;
        }
    }

    /// Record the established secret and complete the handshake.
    pub fn complete(&mut self, secret: &[u8]) -> Result<(), HandshakeError> {
        if self.initial_secret.is_some() {
            return Err(HandshakeError::CorruptState("initial secret already set".into()));
        }
        self.initial_secret = Some(secret.to_vec());
        self.current_step = HandshakeStep::Complete;
        Ok(())
    }

    /// Check the step/secret pairing of a loaded state.
    pub fn validate(&self) -> Result<(), HandshakeError> {
        match (self.current_step, &self.initial_secret) {
            (HandshakeStep::Complete, None) => {
                Err(HandshakeError::CorruptState("complete without a secret".into()))
            },
            (HandshakeStep::Start, Some(_)) => {
                Err(HandshakeError::CorruptState("secret set before completion".into()))
            },
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeState")
            .field("is_alice", &self.is_alice)
            .field("current_step", &self.current_step)
            .field("has_secret", &self.initial_secret.is_some())
            .field("has_cyphertext", &self.initial_secret_cyphertext.is_some())
            .finish()
    }
}

/// Alice: sign (if possible) and seal `secret` to the remote party.
pub async fn seal_initial_secret<P: PrimitiveProvider>(
    provider: &P,
    local: &dyn LocalIdentity,
    remote: &dyn RemoteIdentity,
    secret: &[u8],
) -> Result<Vec<u8>, HandshakeError> {
    let payload = match local.signing_key_pair().await {
        Some(pair) => Zeroizing::new(provider.sign(secret, &pair)),
        None => Zeroizing::new(secret.to_vec()),
    };
    let recipient = remote.public_encryption_key().await;
    provider.seal_box(&payload, &recipient).map_err(HandshakeError::SealFailed)
}

/// Bob: open Alice's sealed secret and verify her signature when her
/// signing key is known.
pub async fn open_initial_secret<P: PrimitiveProvider>(
    provider: &P,
    local: &dyn LocalIdentity,
    remote: &dyn RemoteIdentity,
    cyphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, HandshakeError> {
    let pair = local.encryption_key_pair().await;
    let opened = provider.open_box(cyphertext, &pair).map_err(HandshakeError::OpenFailed)?;

    let secret = match remote.public_signing_key().await {
        Some(key) => match provider.open_signed(&opened, &key) {
            Ok(secret) => Zeroizing::new(secret),
            Err(CryptoError::SignatureInvalid) => return Err(HandshakeError::SignatureInvalid),
            Err(err) => return Err(HandshakeError::OpenFailed(err)),
        },
        None => opened,
    };

    if secret.len() != EXCHANGE_SECRET_LEN {
        return Err(HandshakeError::InvalidSecret { length: secret.len() });
    }
    Ok(secret)
}
