//! Frame encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - the nonce must be provided by the caller. The
//! 24-byte extended nonce is large enough to be drawn at random per message
//! without a collision budget.
//!
//! Sealed layout: `nonce (24) || ciphertext || tag (16)`.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::Zeroizing;

use crate::{error::CryptoError, keys::SymmetricKey};

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes added to a plaintext by [`seal`].
pub const OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypt and authenticate `plaintext`, binding `aad`.
///
/// # Security
///
/// - Caller MUST NOT reuse a nonce under the same key
/// - `aad` is authenticated but not encrypted; the receiver must supply the
///   identical bytes to [`open`]
pub fn seal(plaintext: &[u8], key: &SymmetricKey, aad: &[u8], nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

/// Verify and decrypt a buffer produced by [`seal`].
///
/// # Errors
///
/// - `Malformed`: shorter than nonce + tag
/// - `AuthenticationFailed`: wrong key, wrong `aad` or tampered bytes
pub fn open(sealed: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < OVERHEAD {
        return Err(CryptoError::malformed(format!(
            "sealed frame is {} bytes, need at least {OVERHEAD}",
            sealed.len()
        )));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
