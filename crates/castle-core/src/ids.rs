//! Session and instance identifiers.

use std::fmt;

use castle_crypto::PrimitiveProvider;
use serde::{Deserialize, Serialize};

/// Length of an instance id in bytes.
pub const INSTANCE_ID_SIZE: usize = 16;

/// Names one persistent pairwise channel between two parties.
///
/// Persisted handshake and ratchet state is keyed by this id, so a session
/// reconstructed with the same id resumes without a second key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u128);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Random tag generated once per session construction.
///
/// Embedded in every frame so the receiver can tell apart traffic from two
/// live constructions of the same channel (e.g. before and after a
/// reconnect).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId([u8; INSTANCE_ID_SIZE]);

impl InstanceId {
    /// Draw a fresh random id.
    pub fn generate<P: PrimitiveProvider>(provider: &P) -> Self {
        Self(provider.random_array::<INSTANCE_ID_SIZE>())
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: [u8; INSTANCE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; INSTANCE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({self})")
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
