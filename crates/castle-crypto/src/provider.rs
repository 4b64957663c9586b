//! Primitive provider capability.
//!
//! Sessions never touch a global RNG or call the primitive modules
//! directly; they hold a [`PrimitiveProvider`] injected at construction.
//! Implementations only supply randomness. Every cryptographic operation is
//! a provided method over the pure functions in this crate, so a seeded
//! provider makes a whole session run reproducible.

use std::sync::{Arc, Mutex, PoisonError};

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use zeroize::Zeroizing;

use crate::{
    aead::{self, NONCE_SIZE},
    error::CryptoError,
    exchange::{self, EXCHANGE_SECRET_LEN},
    keys::{
        EncryptionKeyPair, KEY_SIZE, PublicEncryptionKey, PublicSigningKey, SigningKeyPair,
        SymmetricKey,
    },
    memory, sealed_box, signing,
};

/// Capability interface over the cryptographic primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee that `random_bytes()` uses
/// cryptographically secure entropy in production. Given the same seed, a
/// test implementation produces the same byte sequence.
pub trait PrimitiveProvider: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random fixed-size array.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Fresh secret sized to the ephemeral key exchange output.
    fn generate_secret(&self) -> Zeroizing<Vec<u8>> {
        let mut secret = Zeroizing::new(vec![0u8; EXCHANGE_SECRET_LEN]);
        self.random_bytes(&mut secret);
        secret
    }

    /// Fresh X25519 key pair.
    fn generate_exchange_key_pair(&self) -> EncryptionKeyPair {
        let mut private = self.random_array::<KEY_SIZE>();
        let pair = EncryptionKeyPair::from_private_bytes(private);
        memory::clear(&mut private);
        pair
    }

    /// X25519 shared secret.
    fn exchange(
        &self,
        own: &EncryptionKeyPair,
        peer: &PublicEncryptionKey,
    ) -> Result<Zeroizing<[u8; EXCHANGE_SECRET_LEN]>, CryptoError> {
        exchange::exchange(own, peer)
    }

    /// Sealed-box encrypt to `recipient`.
    fn seal_box(
        &self,
        plaintext: &[u8],
        recipient: &PublicEncryptionKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut ephemeral = self.random_array::<KEY_SIZE>();
        let sealed =
            sealed_box::seal_box(plaintext, recipient, ephemeral, self.random_array::<NONCE_SIZE>());
        memory::clear(&mut ephemeral);
        sealed
    }

    /// Sealed-box decrypt.
    fn open_box(
        &self,
        sealed: &[u8],
        recipient: &EncryptionKeyPair,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        sealed_box::open_box(sealed, recipient)
    }

    /// Ed25519 sign (`signature || message`).
    fn sign(&self, message: &[u8], key_pair: &SigningKeyPair) -> Vec<u8> {
        signing::sign(message, key_pair)
    }

    /// Ed25519 verify, returning the embedded message.
    fn open_signed(
        &self,
        signed: &[u8],
        public_key: &PublicSigningKey,
    ) -> Result<Vec<u8>, CryptoError> {
        signing::open_signed(signed, public_key)
    }

    /// AEAD encrypt with a random nonce.
    fn seal(&self, plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Vec<u8> {
        aead::seal(plaintext, key, aad, self.random_array::<NONCE_SIZE>())
    }

    /// AEAD decrypt.
    fn open(
        &self,
        sealed: &[u8],
        key: &SymmetricKey,
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        aead::open(sealed, key, aad)
    }

    /// Zero a buffer.
    fn clear(&self, buffer: &mut [u8]) {
        memory::clear(buffer);
    }

    /// Constant-time equality.
    fn compare(&self, a: &[u8], b: &[u8]) -> bool {
        memory::compare(a, b)
    }

    /// Concatenate into a zeroizing buffer.
    fn concat(&self, parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        memory::concat(parts)
    }
}

/// Production provider using OS cryptographic randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails. This is intentional - a session without
/// functioning cryptographic randomness cannot operate securely.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a new system provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PrimitiveProvider for SystemProvider {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - session cannot operate securely");
    }
}

/// Deterministic provider for tests and simulation.
///
/// Clones share one ChaCha20 stream, so two sessions built from clones of
/// the same provider draw distinct bytes.
#[derive(Clone)]
pub struct SeededProvider {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SeededProvider {
    /// Create a provider seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }
}

impl PrimitiveProvider for SeededProvider {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
