//! Ephemeral X25519 key exchange

use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{EncryptionKeyPair, KEY_SIZE, PublicEncryptionKey},
};

/// Length of an X25519 shared secret, and therefore of the handshake's
/// initial secret.
pub const EXCHANGE_SECRET_LEN: usize = KEY_SIZE;

/// Compute the X25519 shared secret between `own` and `peer`.
///
/// # Errors
///
/// - `InvalidKey`: `peer` is a low-order point, so the output would not
///   depend on `own`'s secret
pub fn exchange(
    own: &EncryptionKeyPair,
    peer: &PublicEncryptionKey,
) -> Result<Zeroizing<[u8; EXCHANGE_SECRET_LEN]>, CryptoError> {
    let shared = own.to_dalek_secret().diffie_hellman(&peer.to_dalek());

    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey { reason: "non-contributory X25519 point".to_string() });
    }

    Ok(Zeroizing::new(*shared.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let alice = EncryptionKeyPair::from_private_bytes([1; KEY_SIZE]);
        let bob = EncryptionKeyPair::from_private_bytes([2; KEY_SIZE]);

        let ab = exchange(&alice, &bob.public_key()).unwrap();
        let ba = exchange(&bob, &alice.public_key()).unwrap();

        assert_eq!(*ab, *ba);
    }

    #[test]
    fn rejects_low_order_point() {
        let own = EncryptionKeyPair::from_private_bytes([1; KEY_SIZE]);
        let zero = PublicEncryptionKey::from_bytes([0; KEY_SIZE]);

        assert!(matches!(exchange(&own, &zero), Err(CryptoError::InvalidKey { .. })));
    }
}
