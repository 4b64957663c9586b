use async_trait::async_trait;
use castle_crypto::PrimitiveProvider;
use tokio::sync::OnceCell;

use super::{Session, SessionContext, shared::SessionCore};
use crate::{
    config::SessionVariant,
    error::{HandshakeError, SessionError},
    frame::Packet,
    ids::InstanceId,
    ratchet::{Event, RatchetRecord, RatchetSnapshot},
    storage::Storage,
    transport::Staged,
};

/// Session whose keys rotate continuously.
///
/// Each direction has its own key. Every `rotation_threshold` sends the
/// sender opens a Diffie-Hellman rotation; once both sides have moved on,
/// the keys of the previous generation are gone, so later compromise does
/// not expose earlier traffic. Message ids give in-order, exactly-once
/// delivery within the reorder window.
///
/// Every state change is persisted, together with the packets it produced,
/// before it becomes visible in memory. A failed store leaves the session
/// and its outgoing queue as they were before the call.
pub struct RatchetSession<P, S> {
    core: SessionCore<P, S, Option<RatchetRecord>>,
    ready: OnceCell<Result<(), SessionError>>,
}

impl<P: PrimitiveProvider, S: Storage> RatchetSession<P, S> {
    /// Construct from injected collaborators, resuming any stored ratchet.
    pub fn new(ctx: SessionContext<P, S>) -> Result<Self, SessionError> {
        let record = ctx.storage.load_ratchet(ctx.session_id)?;
        if let Some(record) = &record {
            tracing::debug!(
                session_id = %ctx.session_id,
                generation = record.state.generation(),
                "resuming ratchet"
            );
        }
        Ok(Self { core: SessionCore::new(ctx, record)?, ready: OnceCell::new() })
    }

    /// Run the handshake now if it can complete without the peer.
    pub async fn start(&self) -> Result<(), SessionError> {
        if self.core.can_establish().await {
            self.established().await?;
        }
        Ok(())
    }

    async fn established(&self) -> Result<(), SessionError> {
        let ready = self.ready.get_or_init(|| self.initialize()).await.clone();
        // Packets held during the handshake are reported outside the cell
        self.core.deliver_staged().await;
        ready
    }

    async fn initialize(&self) -> Result<(), SessionError> {
        let secret = self.core.establish().await?;

        let seeded = {
            let mut guard = self.core.state.acquire("ratchet seed").await;
            if guard.channel.is_none() {
                let record = RatchetRecord::new(&secret, self.core.is_alice);
                match self.core.storage.store_ratchet(self.core.session_id, &record) {
                    Ok(()) => {
                        guard.channel = Some(record);
                        Ok(())
                    },
                    Err(err) => Err(SessionError::from(err)),
                }
            } else {
                Ok(())
            }
        };
        drop(secret);
        if let Err(err) = seeded {
            self.core.resolve_initial_messages(Err(err.clone()));
            return Err(err);
        }

        let mut replied = false;
        for packet in self.core.take_pending() {
            match self.accept(&packet).await {
                Ok(sent) => replied |= sent,
                Err(err) => tracing::warn!(
                    session_id = %self.core.session_id,
                    error = %err,
                    "dropping packet held during handshake"
                ),
            }
        }
        if replied {
            self.core.flush_quietly().await;
        }
        self.core.resolve_initial_messages(Ok(()));
        Ok(())
    }

    async fn process(&self, packet: &[u8]) -> Result<(), SessionError> {
        let replied = self.accept(packet).await?;
        self.core.deliver_staged().await;
        if replied {
            self.core.flush_quietly().await;
        }
        Ok(())
    }

    /// Feed one packet to the ratchet and commit the result. Accepted
    /// plaintexts are staged for delivery. Returns true if control packets
    /// were queued.
    async fn accept(&self, packet: &[u8]) -> Result<bool, SessionError> {
        let core = &self.core;
        let mut guard = core.state.acquire("ratchet receive").await;
        let Some(record) = guard.channel.as_mut() else {
            return Err(HandshakeError::CorruptState("ratchet record missing".into()).into());
        };

        let mut working = record.clone();
        let events = working.receive(
            &core.provider,
            packet,
            &core.instance_id,
            &core.config,
            core.session_id,
        )?;

        let mut outgoing = Vec::new();
        let mut accepted = Vec::new();
        for event in events {
            match event {
                Event::Deliver(delivery) => accepted.push(delivery),
                Event::Send(packet) => outgoing.push(packet),
            }
        }

        let replied = !outgoing.is_empty();
        core.transport.enqueue(outgoing, Staged::ratchet(&working)).await?;
        *record = working;
        for delivery in accepted {
            core.stage(delivery);
        }
        drop(guard);
        Ok(replied)
    }
}

#[async_trait]
impl<P: PrimitiveProvider, S: Storage> Session for RatchetSession<P, S> {
    async fn send(&self, plaintext: &[u8], timestamp: f64) -> Result<(), SessionError> {
        self.core.ensure_live()?;
        self.established().await?;

        let core = &self.core;
        {
            let mut guard = core.state.acquire("ratchet send").await;
            let Some(record) = guard.channel.as_mut() else {
                return Err(HandshakeError::CorruptState("ratchet record missing".into()).into());
            };

            let mut working = record.clone();
            let packets = working.seal_data(
                &core.provider,
                plaintext,
                timestamp,
                &core.instance_id,
                &core.config,
                core.session_id,
            )?;

            // Under the lock so queue order matches message id order
            core.transport.enqueue(packets, Staged::ratchet(&working)).await?;
            *record = working;
        }
        core.transport.flush().await
    }

    async fn receive(&self, packet: &[u8]) -> Result<(), SessionError> {
        self.core.ensure_live()?;

        match Packet::parse(packet)? {
            Packet::Handshake(cyphertext) => {
                self.core.accept_handshake_packet(cyphertext).await?;
                self.established().await
            },
            Packet::Ratchet { .. } => {
                if self.core.defer_until_keyed(packet).await {
                    return Ok(());
                }
                self.established().await?;
                self.process(packet).await
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
        SessionVariant::Ratchet
    }

    async fn ratchet_snapshot(&self) -> Option<RatchetSnapshot> {
        let guard = self.core.state.acquire("ratchet snapshot").await;
        guard.channel.as_ref().map(RatchetRecord::snapshot)
    }
}
