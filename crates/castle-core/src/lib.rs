//! Castle Session Core
//!
//! Pairwise authenticated encrypted channels between two parties, Alice
//! (initiator) and Bob (responder). The session never touches the network
//! or the disk directly: packets go out through a caller-supplied
//! [`Transport`], state goes through a caller-supplied [`Storage`], and
//! randomness comes from an injected
//! [`PrimitiveProvider`](castle_crypto::PrimitiveProvider).
//!
//! # Architecture
//!
//! ```text
//! caller ──send──► Session ──seal──► SessionTransport ──queue──► Transport ──► peer
//!                    │                     │
//!                    │                  Storage (outgoing queue)
//!                    ▼
//!          HandshakeState + (static key | RatchetRecord) ──► Storage
//!
//! peer ──► Transport ──receive──► Session ──open/order──► Transport::process
//! ```
//!
//! # Packets
//!
//! | Kind | Byte | Layout |
//! |------|------|--------|
//! | Handshake | `0x01` | `kind ‖ sealed box` |
//! | Lite | `0x02` | `kind ‖ nonce ‖ aead` |
//! | Ratchet | `0x03` | `kind ‖ generation u32 BE ‖ message id u32 BE ‖ nonce ‖ aead` |
//!
//! Every frame inside the AEAD starts with the sender's `f64` timestamp and
//! its 16-byte instance id.
//!
//! # Variants
//!
//! - [`LiteSession`]: one static key. Cheap, no forward secrecy.
//! - [`RatchetSession`]: rotating per-direction keys, in-order exactly-once
//!   delivery within a reorder window.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod identity;
pub mod ids;
pub mod instances;
pub mod ratchet;
pub mod session;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::{SessionConfig, SessionVariant};
pub use error::{HandshakeError, SessionError, TransportError};
pub use handshake::{HandshakeState, HandshakeStep};
pub use identity::{LocalIdentity, PeerId, RemoteIdentity};
pub use ids::{InstanceId, SessionId};
pub use ratchet::{RatchetRecord, RatchetSnapshot, RotationPhase};
pub use session::{LiteSession, RatchetSession, Session, SessionContext, open_session};
pub use storage::{Commit, MemoryStorage, Storage, StorageError};
pub use transport::{DecryptedMessage, Processed, Transport};
