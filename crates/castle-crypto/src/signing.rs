//! Ed25519 signed messages.
//!
//! Layout: `signature (64) || message`.

use ed25519_dalek::{SIGNATURE_LENGTH, Signature, Signer};

use crate::{
    error::CryptoError,
    keys::{PublicSigningKey, SigningKeyPair},
};

/// Bytes prepended to a message by [`sign`].
pub const SIGNATURE_SIZE: usize = SIGNATURE_LENGTH;

/// Sign `message`, returning the signature followed by the message.
pub fn sign(message: &[u8], key_pair: &SigningKeyPair) -> Vec<u8> {
    let signature = key_pair.as_dalek().sign(message);

    let mut signed = Vec::with_capacity(SIGNATURE_SIZE + message.len());
    signed.extend_from_slice(&signature.to_bytes());
    signed.extend_from_slice(message);
    signed
}

/// Verify a buffer produced by [`sign`] and return the embedded message.
///
/// Uses strict verification (rejects malleable and small-order signatures).
///
/// # Errors
///
/// - `Malformed`: shorter than a signature
/// - `SignatureInvalid`: the signature does not match `public_key`
pub fn open_signed(signed: &[u8], public_key: &PublicSigningKey) -> Result<Vec<u8>, CryptoError> {
    if signed.len() < SIGNATURE_SIZE {
        return Err(CryptoError::malformed(format!(
            "signed message is {} bytes, need at least {SIGNATURE_SIZE}",
            signed.len()
        )));
    }

    let (signature_bytes, message) = signed.split_at(SIGNATURE_SIZE);
    let signature =
        Signature::from_slice(signature_bytes).map_err(|_| CryptoError::SignatureInvalid)?;

    public_key
        .as_dalek()
        .verify_strict(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;

    Ok(message.to_vec())
}
