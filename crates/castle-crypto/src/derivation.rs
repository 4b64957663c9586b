//! Key derivation using HKDF, and HMAC key fingerprints

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{KEY_SIZE, SymmetricKey};

type HmacSha256 = Hmac<Sha256>;

/// Label mixed into every fingerprint
const FINGERPRINT_LABEL: &[u8] = b"castleFingerprintV1";

/// Length of a key fingerprint in bytes
pub const FINGERPRINT_SIZE: usize = 16;

/// Derive a single 32-byte key.
///
/// `label` provides domain separation: the same input keying material with
/// different labels yields unrelated keys.
pub fn derive_key(ikm: &[u8], salt: Option<&[u8]>, label: &[u8]) -> SymmetricKey {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);

    let mut okm = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(label, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let key = SymmetricKey::from_bytes(okm);
    okm.zeroize();
    key
}

/// Derive two independent 32-byte keys from one extraction.
///
/// Used for the per-direction key pairs of the ratchet: the first key is the
/// initiator-to-responder key, the second the reverse.
pub fn derive_key_pair(
    ikm: &[u8],
    salt: Option<&[u8]>,
    label: &[u8],
) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);

    let mut okm = [0u8; KEY_SIZE * 2];
    let Ok(()) = hkdf.expand(label, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut first = [0u8; KEY_SIZE];
    let mut second = [0u8; KEY_SIZE];
    first.copy_from_slice(&okm[..KEY_SIZE]);
    second.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();

    let keys = (SymmetricKey::from_bytes(first), SymmetricKey::from_bytes(second));
    first.zeroize();
    second.zeroize();
    keys
}

/// Non-reversible fingerprint of a key.
///
/// Lets two parties (or a test) check that they hold the same key without
/// exposing it.
pub fn key_fingerprint(key: &SymmetricKey) -> [u8; FINGERPRINT_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(FINGERPRINT_LABEL);
    let result = mac.finalize().into_bytes();

    let mut fingerprint = [0u8; FINGERPRINT_SIZE];
    fingerprint.copy_from_slice(&result[..FINGERPRINT_SIZE]);
    fingerprint
}
