//! Sealed boxes: anonymous asymmetric encryption to an X25519 public key.
//!
//! 1. Take a caller-supplied ephemeral X25519 secret
//! 2. Exchange it with the recipient's public key
//! 3. Derive a one-shot key with HKDF, salted by both public keys
//! 4. Encrypt with `XChaCha20-Poly1305`, binding the ephemeral public key
//!
//! Layout: `ephemeral public (32) || nonce (24) || ciphertext || tag (16)`.

use zeroize::Zeroizing;

use crate::{
    aead::{self, NONCE_SIZE},
    derivation::derive_key,
    error::CryptoError,
    exchange::exchange,
    keys::{EncryptionKeyPair, KEY_SIZE, PublicEncryptionKey},
};

/// HKDF label for sealed box keys
const SEALED_BOX_LABEL: &[u8] = b"castleSealedBoxV1";

/// Bytes added to a plaintext by [`seal_box`].
pub const SEALED_BOX_OVERHEAD: usize = KEY_SIZE + aead::OVERHEAD;

/// Encrypt `plaintext` so only the holder of `recipient`'s private key can
/// read it.
///
/// # Errors
///
/// - `InvalidKey`: `recipient` is a low-order point
pub fn seal_box(
    plaintext: &[u8],
    recipient: &PublicEncryptionKey,
    ephemeral_private: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EncryptionKeyPair::from_private_bytes(ephemeral_private);
    let ephemeral_public = ephemeral.public_key();

    let shared = exchange(&ephemeral, recipient)?;
    let salt = box_salt(&ephemeral_public, recipient);
    let key = derive_key(shared.as_slice(), Some(&salt), SEALED_BOX_LABEL);

    let sealed = aead::seal(plaintext, &key, ephemeral_public.as_bytes(), nonce);

    let mut out = Vec::with_capacity(KEY_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a sealed box with the recipient's key pair.
///
/// # Errors
///
/// - `Malformed`: too short to be a sealed box
/// - `InvalidKey`: embedded ephemeral key is a low-order point
/// - `AuthenticationFailed`: wrong recipient or tampered bytes
pub fn open_box(
    sealed: &[u8],
    recipient: &EncryptionKeyPair,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < SEALED_BOX_OVERHEAD {
        return Err(CryptoError::malformed(format!(
            "sealed box is {} bytes, need at least {SEALED_BOX_OVERHEAD}",
            sealed.len()
        )));
    }

    let (ephemeral_bytes, body) = sealed.split_at(KEY_SIZE);
    let mut ephemeral = [0u8; KEY_SIZE];
    ephemeral.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicEncryptionKey::from_bytes(ephemeral);

    let shared = exchange(recipient, &ephemeral_public)?;
    let salt = box_salt(&ephemeral_public, &recipient.public_key());
    let key = derive_key(shared.as_slice(), Some(&salt), SEALED_BOX_LABEL);

    aead::open(body, &key, ephemeral_public.as_bytes())
}

fn box_salt(ephemeral: &PublicEncryptionKey, recipient: &PublicEncryptionKey) -> [u8; KEY_SIZE * 2] {
    let mut salt = [0u8; KEY_SIZE * 2];
    salt[..KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> EncryptionKeyPair {
        EncryptionKeyPair::from_private_bytes([0x42; KEY_SIZE])
    }

    #[test]
    fn seal_open_roundtrip() {
        let bob = recipient();
        let sealed = seal_box(b"initial secret", &bob.public_key(), [1; 32], [2; 24]).unwrap();

        assert_eq!(sealed.len(), b"initial secret".len() + SEALED_BOX_OVERHEAD);
        assert_eq!(open_box(&sealed, &bob).unwrap().as_slice(), b"initial secret");
    }

    #[test]
    fn wrong_recipient_fails() {
        let bob = recipient();
        let eve = EncryptionKeyPair::from_private_bytes([0x43; KEY_SIZE]);
        let sealed = seal_box(b"initial secret", &bob.public_key(), [1; 32], [2; 24]).unwrap();

        assert_eq!(open_box(&sealed, &eve), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn swapped_ephemeral_key_fails() {
        let bob = recipient();
        let mut sealed = seal_box(b"initial secret", &bob.public_key(), [1; 32], [2; 24]).unwrap();
        let other = EncryptionKeyPair::from_private_bytes([9; KEY_SIZE]).public_key();
        sealed[..KEY_SIZE].copy_from_slice(other.as_bytes());

        assert!(open_box(&sealed, &bob).is_err());
    }

    #[test]
    fn short_box_is_malformed() {
        let result = open_box(&[0u8; SEALED_BOX_OVERHEAD - 1], &recipient());
        assert!(matches!(result, Err(CryptoError::Malformed { .. })));
    }

    #[test]
    fn low_order_recipient_rejected() {
        let zero = PublicEncryptionKey::from_bytes([0; KEY_SIZE]);
        assert!(matches!(
            seal_box(b"x", &zero, [1; 32], [2; 24]),
            Err(CryptoError::InvalidKey { .. })
        ));
    }
}
