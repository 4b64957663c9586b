//! Pairwise sessions.
//!
//! Both variants share one contract, [`Session`], and are selected by
//! [`SessionConfig::variant`] in [`open_session`]:
//!
//! - [`LiteSession`]: one static key derived from the handshake secret. No
//!   forward secrecy.
//! - [`RatchetSession`]: per-direction keys rotated in lock-step, with
//!   message-id ordering and replay defense.
//!
//! # Lifecycle
//!
//! ```text
//! Keying ──handshake ok──► Established
//!    │
//!    └──handshake error / abort──► Failed (transport aborted, final)
//! ```
//!
//! Key derivation is memoized in a `tokio::sync::OnceCell`: every `send`
//! and `receive` awaits the same in-flight computation, which runs exactly
//! once. Alice's handshake completes on its own; Bob's waits for Alice's
//! `Handshake` packet to arrive through `receive`. Data packets that reach
//! Bob before it are held and processed right after establishment.

mod lite;
mod ratchet;
mod shared;

use std::sync::Arc;

use async_trait::async_trait;
use castle_crypto::PrimitiveProvider;
pub use lite::LiteSession;
pub use ratchet::RatchetSession;

use crate::{
    config::{SessionConfig, SessionVariant},
    error::SessionError,
    identity::{LocalIdentity, RemoteIdentity},
    ids::{InstanceId, SessionId},
    ratchet::RatchetSnapshot,
    storage::Storage,
    transport::Transport,
};

/// Collaborators and parameters injected into a session at construction.
pub struct SessionContext<P, S> {
    /// Cryptographic primitives and randomness
    pub provider: P,
    /// Persistence for handshake, ratchet and outgoing state
    pub storage: S,
    /// External channel
    pub transport: Arc<dyn Transport>,
    /// The local party
    pub local: Arc<dyn LocalIdentity>,
    /// The remote party
    pub remote: Arc<dyn RemoteIdentity>,
    /// Channel id; persisted state is keyed by it
    pub session_id: SessionId,
    /// True for the initiator. Decided by the caller, never negotiated.
    pub is_alice: bool,
    /// Variant and tuning
    pub config: SessionConfig,
}

/// Authenticated encrypted channel to one peer.
#[async_trait]
pub trait Session: Send + Sync {
    /// Encrypt `plaintext` and hand it to the transport.
    ///
    /// Waits for the handshake. The packet is queued durably before
    /// delivery is attempted; a transport error leaves it queued for the
    /// next flush.
    async fn send(&self, plaintext: &[u8], timestamp: f64) -> Result<(), SessionError>;

    /// Take in one packet from the transport.
    ///
    /// Accepted plaintexts are reported through
    /// [`Transport::process`](crate::Transport::process). Authentication
    /// failures are returned and deliver nothing; replays and other ordering
    /// anomalies are absorbed and logged.
    async fn receive(&self, packet: &[u8]) -> Result<(), SessionError>;

    /// Resolves once the handshake completed and every packet received
    /// before it was processed.
    async fn initial_messages_processed(&self) -> Result<(), SessionError>;

    /// Retry delivery of queued packets.
    async fn flush(&self) -> Result<(), SessionError>;

    /// End the session: the transport is aborted, later sends fail and
    /// pending handshake waits return [`SessionError::Aborted`].
    async fn abort(&self);

    /// Random id of this construction, embedded in every frame.
    fn instance_id(&self) -> InstanceId;

    /// Which variant this is.
    fn variant(&self) -> SessionVariant;

    /// Ratchet inspection view. `None` for the lite variant and before the
    /// handshake.
    async fn ratchet_snapshot(&self) -> Option<RatchetSnapshot> {
        None
    }
}

/// Construct the session variant named by `ctx.config.variant`.
///
/// Alice's handshake runs immediately, so her sealed secret is queued for
/// Bob before this returns; a resumed Bob with a stored cyphertext also
/// completes here. A handshake failure fails construction.
pub async fn open_session<P: PrimitiveProvider, S: Storage>(
    ctx: SessionContext<P, S>,
) -> Result<Box<dyn Session>, SessionError> {
    match ctx.config.variant {
        SessionVariant::Lite => {
            let session = LiteSession::new(ctx)?;
            session.start().await?;
            Ok(Box::new(session))
        },
        SessionVariant::Ratchet => {
            let session = RatchetSession::new(ctx)?;
            session.start().await?;
            Ok(Box::new(session))
        },
    }
}
