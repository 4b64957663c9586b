//! Castle Cryptographic Primitives
//!
//! Cryptographic building blocks for the Castle pairwise channel. Every
//! operation is a pure function whose randomness is supplied by the caller,
//! which keeps outputs deterministic under test. [`PrimitiveProvider`] wraps
//! these functions behind a capability trait so sessions receive their
//! randomness source by injection instead of reaching for a global RNG.
//!
//! # Key Lifecycle
//!
//! ```text
//! Alice: random secret ──sign──► seal_box(Bob's X25519 key) ──► relay
//!                                                                  │
//! Bob:   open_box(own X25519 pair) ──open_signed(Alice's key)──► secret
//!        │
//!        ▼
//! HKDF → static key (lite) | per-direction keys (ratchet)
//!        │
//!        ▼
//! XChaCha20-Poly1305 → sealed frames
//! ```
//!
//! Ratchet rotation mixes a fresh X25519 exchange into the previous keys via
//! HKDF, after which the superseded keys are zeroized.
//!
//! # Security
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects any tampered byte or wrong key
//! - Ed25519 signatures bind the initial secret to Alice's long-term key
//! - Associated data binds cleartext packet headers to the ciphertext
//!
//! Memory hygiene:
//! - Symmetric keys and X25519 private keys zeroize on drop
//! - Opened plaintexts are returned as [`zeroize::Zeroizing`] buffers
//! - [`memory::compare`] runs in constant time

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod derivation;
pub mod error;
pub mod exchange;
pub mod keys;
pub mod memory;
pub mod provider;
pub mod sealed_box;
pub mod signing;

pub use derivation::{FINGERPRINT_SIZE, derive_key, derive_key_pair, key_fingerprint};
pub use error::CryptoError;
pub use exchange::EXCHANGE_SECRET_LEN;
pub use keys::{
    EncryptionKeyPair, PublicEncryptionKey, PublicSigningKey, SigningKeyPair, SymmetricKey,
};
pub use provider::{PrimitiveProvider, SeededProvider, SystemProvider};
pub use zeroize::Zeroizing;
