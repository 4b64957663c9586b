//! Storage error types.
//!
//! - `Serialization`: a record could not be encoded or decoded
//! - `Io`: the backing store failed (injected in chaos tests)

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backing store failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for StorageError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
