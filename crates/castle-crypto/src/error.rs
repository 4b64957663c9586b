//! Error types for primitive operations

use thiserror::Error;

/// Errors from cryptographic primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// AEAD tag did not verify (wrong key, tampered bytes or wrong AAD)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Input too short or structurally invalid
    #[error("malformed input: {reason}")]
    Malformed {
        /// What was wrong with the input
        reason: String,
    },

    /// Ed25519 signature did not verify
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Public key is not usable (low-order point, bad encoding)
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if the error means the input was forged or corrupted.
    ///
    /// Malformed input and bad keys may come from a buggy peer. Integrity
    /// failures never do.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::SignatureInvalid)
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_failures() {
        assert!(CryptoError::AuthenticationFailed.is_integrity_failure());
        assert!(CryptoError::SignatureInvalid.is_integrity_failure());
        assert!(!CryptoError::malformed("short").is_integrity_failure());
        assert!(!CryptoError::InvalidKey { reason: "low order".into() }.is_integrity_failure());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::malformed("sealed box shorter than 72 bytes");
        assert_eq!(err.to_string(), "malformed input: sealed box shorter than 72 bytes");
    }
}
