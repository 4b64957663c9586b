//! Property-based tests for the primitive provider
//!
//! 1. **Round-trip**: open(seal(m)) == m for AEAD and sealed boxes
//! 2. **Key binding**: a frame opened under any other key fails
//! 3. **Tamper evidence**: flipping any byte fails authentication
//! 4. **Signatures**: only the signer's key verifies

use castle_crypto::{
    CryptoError, EncryptionKeyPair, PrimitiveProvider, SeededProvider, SigningKeyPair,
    SymmetricKey,
};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = [u8; 32]> {
    prop::collection::vec(any::<u8>(), 32..=32).prop_map(|v| {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&v);
        arr
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_seal_open_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..1000),
        aad in prop::collection::vec(any::<u8>(), 0..16),
        key in key_strategy(),
        seed in any::<u64>(),
    ) {
        let provider = SeededProvider::new(seed);
        let key = SymmetricKey::from_bytes(key);

        let sealed = provider.seal(&plaintext, &key, &aad);
        let opened = provider.open(&sealed, &key, &aad).unwrap();

        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn prop_other_key_never_opens(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        key_a in key_strategy(),
        key_b in key_strategy(),
    ) {
        prop_assume!(key_a != key_b);
        let provider = SeededProvider::new(0);

        let sealed = provider.seal(&plaintext, &SymmetricKey::from_bytes(key_a), &[]);
        let result = provider.open(&sealed, &SymmetricKey::from_bytes(key_b), &[]);

        prop_assert_eq!(result, Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn prop_any_flipped_byte_fails(
        plaintext in prop::collection::vec(any::<u8>(), 1..128),
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let provider = SeededProvider::new(1);
        let key = SymmetricKey::from_bytes([0x11; 32]);

        let mut sealed = provider.seal(&plaintext, &key, b"aad");
        let index = position.index(sealed.len());
        sealed[index] ^= mask;

        prop_assert!(provider.open(&sealed, &key, b"aad").is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_sealed_box_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..200),
        recipient in key_strategy(),
        seed in any::<u64>(),
    ) {
        let provider = SeededProvider::new(seed);
        let bob = EncryptionKeyPair::from_private_bytes(recipient);

        let sealed = provider.seal_box(&plaintext, &bob.public_key()).unwrap();
        let opened = provider.open_box(&sealed, &bob).unwrap();

        prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn prop_signature_binds_signer(
        message in prop::collection::vec(any::<u8>(), 0..200),
        signer in key_strategy(),
        other in key_strategy(),
    ) {
        prop_assume!(signer != other);
        let provider = SeededProvider::new(2);
        let signer = SigningKeyPair::from_seed(&signer);
        let other = SigningKeyPair::from_seed(&other);

        let signed = provider.sign(&message, &signer);

        prop_assert_eq!(provider.open_signed(&signed, &signer.public_key()).unwrap(), message);
        prop_assert!(provider.open_signed(&signed, &other.public_key()).is_err());
    }
}
