use castle_crypto::PublicEncryptionKey;
use serde::{Deserialize, Serialize};

use crate::{error::SessionError, frame::read_u32};

const STEP_ACKNOWLEDGE: u8 = 0;
const STEP_PROPOSE: u8 = 1;
const STEP_RESPOND: u8 = 2;

/// Encoded size of an update carrying a public key.
pub const UPDATE_WITH_KEY_SIZE: usize = 5 + 32;

/// Where a rotation update sits in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStep {
    /// Initiator advertises its fresh public key
    Propose(PublicEncryptionKey),
    /// Responder answers a proposal with its own fresh public key
    Respond(PublicEncryptionKey),
    /// Sent under the new generation once its keys are in place
    Acknowledge,
}

/// Rotation control message, carried inside an authenticated ratchet frame.
///
/// Wire layout: `generation(u32 BE) ‖ step(1) ‖ [public key(32)]`. The key
/// is present for `Propose` and `Respond` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetUpdate {
    /// Generation the rotation moves to
    pub generation: u32,
    /// Step of the exchange
    pub step: UpdateStep,
}

impl RatchetUpdate {
    /// Public key carried by the update, if any. `None` means
    /// acknowledgement.
    pub fn public_key(&self) -> Option<&PublicEncryptionKey> {
        match &self.step {
            UpdateStep::Propose(key) | UpdateStep::Respond(key) => Some(key),
            UpdateStep::Acknowledge => None,
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(UPDATE_WITH_KEY_SIZE);
        bytes.extend_from_slice(&self.generation.to_be_bytes());
        match &self.step {
            UpdateStep::Propose(key) => {
                bytes.push(STEP_PROPOSE);
                bytes.extend_from_slice(key.as_bytes());
            },
            UpdateStep::Respond(key) => {
                bytes.push(STEP_RESPOND);
                bytes.extend_from_slice(key.as_bytes());
            },
            UpdateStep::Acknowledge => bytes.push(STEP_ACKNOWLEDGE),
        }
        bytes
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() < 5 {
            return Err(SessionError::malformed("ratchet update truncated"));
        }
        let generation = read_u32(&bytes[..4]);
        let rest = &bytes[5..];

        let step = match bytes[4] {
            STEP_ACKNOWLEDGE if rest.is_empty() => UpdateStep::Acknowledge,
            STEP_PROPOSE => UpdateStep::Propose(read_key(rest)?),
            STEP_RESPOND => UpdateStep::Respond(read_key(rest)?),
            other => {
                return Err(SessionError::malformed(format!(
                    "ratchet update step {other} with {} trailing bytes",
                    rest.len()
                )));
            },
        };

        Ok(Self { generation, step })
    }
}

fn read_key(bytes: &[u8]) -> Result<PublicEncryptionKey, SessionError> {
    let Ok(key) = <[u8; 32]>::try_from(bytes) else {
        return Err(SessionError::malformed("ratchet update key must be 32 bytes"));
    };
    Ok(PublicEncryptionKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_has_no_key() {
        let update = RatchetUpdate { generation: 4, step: UpdateStep::Acknowledge };
        assert_eq!(update.to_bytes(), vec![0, 0, 0, 4, 0]);
        assert_eq!(update.public_key(), None);
        assert_eq!(RatchetUpdate::from_bytes(&update.to_bytes()).unwrap(), update);
    }

    #[test]
    fn proposal_carries_key() {
        let key = PublicEncryptionKey::from_bytes([5; 32]);
        let update = RatchetUpdate { generation: 1, step: UpdateStep::Propose(key) };
        let bytes = update.to_bytes();

        assert_eq!(bytes.len(), UPDATE_WITH_KEY_SIZE);
        assert_eq!(RatchetUpdate::from_bytes(&bytes).unwrap().public_key(), Some(&key));
    }

    #[test]
    fn malformed_updates_are_rejected() {
        assert!(RatchetUpdate::from_bytes(&[0, 0, 0]).is_err());
        // Propose without a key
        assert!(RatchetUpdate::from_bytes(&[0, 0, 0, 1, 1]).is_err());
        // Acknowledge with trailing bytes
        assert!(RatchetUpdate::from_bytes(&[0, 0, 0, 1, 0, 9]).is_err());
        assert!(RatchetUpdate::from_bytes(&[0, 0, 0, 1, 7]).is_err());
    }
}
