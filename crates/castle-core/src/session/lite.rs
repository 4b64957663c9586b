use std::sync::Arc;

use async_trait::async_trait;
use castle_crypto::{PrimitiveProvider, SymmetricKey, derive_key};
use tokio::sync::OnceCell;

use super::{Session, SessionContext, shared::SessionCore};
use crate::{
    config::SessionVariant,
    error::SessionError,
    frame::{Frame, Packet, PacketKind, assemble, encode_frame},
    ids::InstanceId,
    instances::{InstanceTracker, InstanceVerdict},
    ratchet::Delivery,
    storage::Storage,
    transport::Staged,
};

const LITE_KEY_LABEL: &[u8] = b"castle-lite-v1";

/// Associated data of every lite frame: the kind byte.
const LITE_AAD: [u8; 1] = [PacketKind::Lite as u8];

/// Session with a single static key derived from the handshake secret.
///
/// Confidentiality and integrity hold from establishment on, but there is no
/// forward secrecy: whoever learns the key reads all traffic of the session,
/// past and future. There is no ordering or replay defense beyond the
/// transport's; frames are delivered in arrival order.
pub struct LiteSession<P, S> {
    core: SessionCore<P, S, InstanceTracker>,
    key: OnceCell<Result<Arc<SymmetricKey>, SessionError>>,
}

impl<P: PrimitiveProvider, S: Storage> LiteSession<P, S> {
    /// Construct from injected collaborators. Nothing is sent until
    /// [`start`](Self::start) or the first `send`/`receive`.
    pub fn new(ctx: SessionContext<P, S>) -> Result<Self, SessionError> {
        Ok(Self { core: SessionCore::new(ctx, InstanceTracker::new())?, key: OnceCell::new() })
    }

    /// Run the handshake now if it can complete without the peer (Alice,
    /// or a resumed Bob).
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.core.can_establish().await {
            self.established().await?;
        }
        Ok(())
    }

    async fn established(&self) -> Result<Arc<SymmetricKey>, SessionError> {
        let key = self.key.get_or_init(|| self.initialize()).await.clone();
        // Packets held during the handshake are reported outside the cell
        self.core.deliver_staged().await;
        key
    }

    async fn initialize(&self) -> Result<Arc<SymmetricKey>, SessionError> {
        let secret = self.core.establish().await?;
        let key = Arc::new(derive_key(&secret, None, LITE_KEY_LABEL));

        for packet in self.core.take_pending() {
            if let Err(err) = self.open_and_stage(&key, &packet).await {
                tracing::warn!(
                    session_id = %self.core.session_id,
                    error = %err,
                    "dropping packet held during handshake"
                );
            }
        }
        self.core.resolve_initial_messages(Ok(()));
        Ok(key)
    }

    /// Open one lite packet and stage its plaintext for delivery.
    async fn open_and_stage(&self, key: &SymmetricKey, packet: &[u8]) -> Result<(), SessionError> {
        let sealed = match Packet::parse(packet)? {
            Packet::Lite(sealed) => sealed,
            other => return Err(SessionError::UnexpectedPacket { kind: other.kind().to_byte() }),
        };
        let opened = self.core.provider.open(sealed, key, &LITE_AAD)?;
        let frame = Frame::decode(&opened)?;

        let mut guard = self.core.state.acquire("lite stage").await;
        match guard.channel.observe(frame.instance_id, self.core.config.max_stale_instances) {
            InstanceVerdict::Live => {},
            InstanceVerdict::Replaced { previous } => {
                tracing::info!(
                    session_id = %self.core.session_id,
                    instance = %frame.instance_id,
                    %previous,
                    "peer instance replaced"
                );
            },
            InstanceVerdict::Stale => {
                tracing::warn!(
                    session_id = %self.core.session_id,
                    instance = %frame.instance_id,
                    "discarding frame from stale peer instance"
                );
                return Ok(());
            },
        }

        self.core.stage(Delivery {
            packet: packet.to_vec(),
            plaintext: frame.body,
            timestamp: frame.timestamp,
            instance_id: frame.instance_id,
        });
        drop(guard);
        Ok(())
    }
}

#[async_trait]
impl<P: PrimitiveProvider, S: Storage> Session for LiteSession<P, S> {
    async fn send(&self, plaintext: &[u8], timestamp: f64) -> Result<(), SessionError> {
        self.core.ensure_live()?;
        let key = self.established().await?;

        let provider = &self.core.provider;
        let frame = encode_frame(provider, timestamp, &self.core.instance_id, &[plaintext]);
        let sealed = provider.seal(&frame, &key, &LITE_AAD);
        drop(frame);

        let packet = assemble(&LITE_AAD, &sealed);
        self.core.transport.enqueue(vec![packet], Staged::default()).await?;
        self.core.transport.flush().await
    }

    async fn receive(&self, packet: &[u8]) -> Result<(), SessionError> {
        self.core.ensure_live()?;

        match Packet::parse(packet)? {
            Packet::Handshake(cyphertext) => {
                self.core.accept_handshake_packet(cyphertext).await?;
                self.established().await.map(drop)
            },
            Packet::Lite(_) => {
                if self.core.defer_until_keyed(packet).await {
                    return Ok(());
                }
                let key = self.established().await?;
                self.open_and_stage(&key, packet).await?;
                self.core.deliver_staged().await;
                Ok(())
            },
            other => Err(SessionError::UnexpectedPacket { kind: other.kind().to_byte() }),
        }
    }

    async fn initial_messages_processed(&self) -> Result<(), SessionError> {
        self.established().await?;
        self.core.initial_messages_processed().await
    }

    async fn flush(&self) -> Result<(), SessionError> {
        self.core.transport.flush().await
    }

    async fn abort(&self) {
        self.core.abort().await;
    }

    fn instance_id(&self) -> InstanceId {
        self.core.instance_id
    }

    fn variant(&self) -> SessionVariant {
        SessionVariant::Lite
    }
}
