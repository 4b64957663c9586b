//! Wire codec for packets and frames.
//!
//! # Packet
//!
//! ```text
//! Handshake: 0x01 ‖ sealed box
//! Lite:      0x02 ‖ nonce(24) ‖ AEAD(frame)                    AAD = 0x02
//! Ratchet:   0x03 ‖ generation(u32 BE) ‖ message id(u32 BE)
//!                 ‖ nonce(24) ‖ AEAD(frame)                    AAD = first 9 bytes
//! ```
//!
//! # Frame (AEAD plaintext)
//!
//! ```text
//! timestamp(f64 LE) ‖ instance id(16) ‖ body
//! ```
//!
//! The lite body is the caller's plaintext. The ratchet body starts with a
//! content kind byte: `0x00` data, `0x01` ratchet update.

use castle_crypto::{PrimitiveProvider, Zeroizing};

use crate::{
    error::SessionError,
    ids::{INSTANCE_ID_SIZE, InstanceId},
    ratchet::RatchetUpdate,
};

/// Size of the ratchet packet header (kind, generation, message id).
pub const RATCHET_HEADER_SIZE: usize = 9;

/// Size of the frame header (timestamp, instance id).
pub const FRAME_HEADER_SIZE: usize = 8 + INSTANCE_ID_SIZE;

const CONTENT_DATA: u8 = 0x00;
const CONTENT_UPDATE: u8 = 0x01;

/// First byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Sealed initial secret from Alice
    Handshake = 0x01,
    /// Frame under the lite static key
    Lite = 0x02,
    /// Frame under a ratchet generation
    Ratchet = 0x03,
}

impl PacketKind {
    /// Parse a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Handshake),
            0x02 => Some(Self::Lite),
            0x03 => Some(Self::Ratchet),
            _ => None,
        }
    }

    /// Kind byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Cleartext header of a ratchet packet, bound to the AEAD as associated
/// data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetHeader {
    /// Generation of the key set the frame is sealed under
    pub generation: u32,
    /// Sender's message id
    pub message_id: u32,
}

impl RatchetHeader {
    /// Header bytes including the kind byte.
    pub fn to_bytes(&self) -> [u8; RATCHET_HEADER_SIZE] {
        let mut bytes = [0u8; RATCHET_HEADER_SIZE];
        bytes[0] = PacketKind::Ratchet.to_byte();
        bytes[1..5].copy_from_slice(&self.generation.to_be_bytes());
        bytes[5..9].copy_from_slice(&self.message_id.to_be_bytes());
        bytes
    }
}

/// Parsed packet borrowing from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Sealed-box cyphertext
    Handshake(&'a [u8]),
    /// Nonce and AEAD cyphertext
    Lite(&'a [u8]),
    /// Header, then nonce and AEAD cyphertext
    Ratchet {
        /// Cleartext header
        header: RatchetHeader,
        /// Nonce and AEAD cyphertext
        sealed: &'a [u8],
    },
}

impl<'a> Packet<'a> {
    /// Split a packet into its kind and body.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, SessionError> {
        let Some((&kind, rest)) = bytes.split_first() else {
            return Err(SessionError::malformed("empty packet"));
        };

        match PacketKind::from_byte(kind) {
            Some(PacketKind::Handshake) => Ok(Self::Handshake(rest)),
            Some(PacketKind::Lite) => Ok(Self::Lite(rest)),
            Some(PacketKind::Ratchet) => {
                if bytes.len() < RATCHET_HEADER_SIZE {
                    return Err(SessionError::malformed("ratchet header truncated"));
                }
                let header = RatchetHeader {
                    generation: read_u32(&bytes[1..5]),
                    message_id: read_u32(&bytes[5..9]),
                };
                Ok(Self::Ratchet { header, sealed: &bytes[RATCHET_HEADER_SIZE..] })
            },
            None => Err(SessionError::UnexpectedPacket { kind }),
        }
    }

    /// Kind of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Handshake(_) => PacketKind::Handshake,
            Self::Lite(_) => PacketKind::Lite,
            Self::Ratchet { .. } => PacketKind::Ratchet,
        }
    }
}

/// Prefix `body` with `header` (a kind byte or a full ratchet header).
pub fn assemble(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(header.len() + body.len());
    packet.extend_from_slice(header);
    packet.extend_from_slice(body);
    packet
}

/// Build a frame. The timestamp buffer is cleared once copied.
pub fn encode_frame<P: PrimitiveProvider>(
    provider: &P,
    timestamp: f64,
    instance_id: &InstanceId,
    body: &[&[u8]],
) -> Zeroizing<Vec<u8>> {
    let mut timestamp_bytes = timestamp.to_le_bytes();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(body.len() + 2);
    parts.push(&timestamp_bytes);
    parts.push(instance_id.as_bytes());
    parts.extend_from_slice(body);

    let frame = provider.concat(&parts);
    drop(parts);
    provider.clear(&mut timestamp_bytes);
    frame
}

/// Decrypted frame.
#[derive(Debug)]
pub struct Frame {
    /// Sender's timestamp
    pub timestamp: f64,
    /// Sender's session instance
    pub instance_id: InstanceId,
    /// Plaintext (lite) or content (ratchet)
    pub body: Zeroizing<Vec<u8>>,
}

impl Frame {
    /// Split a decrypted frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(SessionError::malformed("frame header truncated"));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[..8]);
        let mut instance = [0u8; INSTANCE_ID_SIZE];
        instance.copy_from_slice(&bytes[8..FRAME_HEADER_SIZE]);

        Ok(Self {
            timestamp: f64::from_le_bytes(timestamp),
            instance_id: InstanceId::from_bytes(instance),
            body: Zeroizing::new(bytes[FRAME_HEADER_SIZE..].to_vec()),
        })
    }
}

/// Body of a ratchet frame.
#[derive(Debug)]
pub enum Content {
    /// Caller plaintext
    Data(Zeroizing<Vec<u8>>),
    /// Rotation control message
    Update(RatchetUpdate),
}

impl Content {
    /// Kind byte prefixed to data payloads.
    pub const DATA_PREFIX: [u8; 1] = [CONTENT_DATA];

    /// Encode an update body.
    pub fn update_body(update: &RatchetUpdate) -> Vec<u8> {
        assemble(&[CONTENT_UPDATE], &update.to_bytes())
    }

    /// Decode a ratchet frame body.
    pub fn decode(body: &[u8]) -> Result<Self, SessionError> {
        match body.split_first() {
            Some((&CONTENT_DATA, payload)) => Ok(Self::Data(Zeroizing::new(payload.to_vec()))),
            Some((&CONTENT_UPDATE, payload)) => RatchetUpdate::from_bytes(payload).map(Self::Update),
            Some((other, _)) => {
                Err(SessionError::malformed(format!("unknown content kind {other:#04x}")))
            },
            None => Err(SessionError::malformed("empty frame body")),
        }
    }
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}
