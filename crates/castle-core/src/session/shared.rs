use std::sync::Arc;

use castle_crypto::{PrimitiveProvider, Zeroizing};

use super::SessionContext;
use crate::{
    config::SessionConfig,
    error::{HandshakeError, SessionError},
    frame::{PacketKind, assemble},
    handshake::{self, HandshakeState},
    identity::{LocalIdentity, RemoteIdentity},
    ids::{InstanceId, SessionId},
    ratchet::Delivery,
    storage::Storage,
    sync::{AsyncList, AsyncValue, Lock, Resolvable},
    transport::{DecryptedMessage, Processed, SessionTransport, Staged},
};

/// State behind the session lock: the handshake plus the variant's channel
/// state.
pub(crate) struct Guarded<V> {
    pub handshake: HandshakeState,
    pub channel: V,
}

/// Handshake, transport and locking shared by both session variants.
pub(crate) struct SessionCore<P, S, V> {
    pub provider: P,
    pub storage: S,
    pub session_id: SessionId,
    pub is_alice: bool,
    pub config: SessionConfig,
    pub instance_id: InstanceId,
    pub transport: SessionTransport<S>,
    pub state: Lock<Guarded<V>>,
    local: Arc<dyn LocalIdentity>,
    remote: Arc<dyn RemoteIdentity>,
    /// Alice's sealed secret as seen by Bob
    cyphertext: AsyncValue<Option<Vec<u8>>>,
    /// Packets that arrived while Bob was still waiting for the secret
    pending: AsyncList<Vec<u8>>,
    /// Accepted frames not yet reported, in acceptance order
    inbox: AsyncList<Delivery>,
    /// Held by whichever call is reporting the inbox
    delivering: Lock<()>,
    initial_messages_processed: Resolvable<Result<(), SessionError>>,
}

impl<P: PrimitiveProvider, S: Storage, V: Send> SessionCore<P, S, V> {
    pub fn new(ctx: SessionContext<P, S>, channel: V) -> Result<Self, SessionError> {
        let handshake = ctx
            .storage
            .load_handshake(ctx.session_id)?
            .unwrap_or_else(|| HandshakeState::new(ctx.is_alice));
        if handshake.is_alice != ctx.is_alice {
            return Err(HandshakeError::CorruptState("stored role differs".into()).into());
        }
        handshake.validate()?;

        let cyphertext = if ctx.is_alice {
            None
        } else {
            handshake.initial_secret_cyphertext.clone()
        };
        let transport = SessionTransport::new(ctx.transport, ctx.storage.clone(), ctx.session_id)?;
        let instance_id = InstanceId::generate(&ctx.provider);

        tracing::debug!(
            session_id = %ctx.session_id,
            is_alice = ctx.is_alice,
            instance = %instance_id,
            resumed = handshake.secret().is_some(),
            "session constructed"
        );

        Ok(Self {
            provider: ctx.provider,
            storage: ctx.storage,
            session_id: ctx.session_id,
            is_alice: ctx.is_alice,
            config: ctx.config,
            instance_id,
            transport,
            state: Lock::new(Guarded { handshake, channel }),
            local: ctx.local,
            remote: ctx.remote,
            cyphertext: AsyncValue::new(cyphertext),
            pending: AsyncList::new(),
            inbox: AsyncList::new(),
            delivering: Lock::new(()),
            initial_messages_processed: Resolvable::new(),
        })
    }

    /// Run the handshake to completion.
    ///
    /// Callers memoize the result; this runs at most once per session. On
    /// success the transport is connected and queued packets are flushed.
    /// On failure the transport is aborted and the failure is final.
    pub async fn establish(&self) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        let result = tokio::select! {
            result = self.run_handshake() => result,
            () = self.transport.aborted() => Err(HandshakeError::Aborted),
        };

        match result {
            Ok(secret) => {
                tracing::info!(
                    session_id = %self.session_id,
                    is_alice = self.is_alice,
                    "handshake complete"
                );
                self.transport.connect().await;
                if let Err(err) = self.transport.flush().await {
                    tracing::warn!(session_id = %self.session_id, error = %err, "initial flush failed");
                }
                Ok(secret)
            },
            Err(err) => {
                let err = match err {
                    HandshakeError::Aborted => SessionError::Aborted,
                    other => {
                        tracing::error!(
                            session_id = %self.session_id,
                            is_alice = self.is_alice,
                            error = %other,
                            "handshake failed"
                        );
                        SessionError::Handshake(other)
                    },
                };
                self.transport.abort().await;
                self.initial_messages_processed.resolve(Err(err.clone()));
                Err(err)
            },
        }
    }

    async fn run_handshake(&self) -> Result<Zeroizing<Vec<u8>>, HandshakeError> {
        if self.is_alice { self.run_alice().await } else { self.run_bob().await }
    }

    async fn run_alice(&self) -> Result<Zeroizing<Vec<u8>>, HandshakeError> {
        let mut guard = self.state.acquire("handshake seal").await;
        if let Some(secret) = guard.handshake.secret() {
            return Ok(Zeroizing::new(secret.to_vec()));
        }

        let secret = self.provider.generate_secret();
        let cyphertext =
            handshake::seal_initial_secret(&self.provider, &*self.local, &*self.remote, &secret)
                .await?;

        let mut staged = guard.handshake.clone();
        staged.initial_secret_cyphertext = Some(cyphertext.clone());
        staged.complete(&secret)?;

        // The completed state and the packet carrying it are stored together
        let packet = assemble(&[PacketKind::Handshake.to_byte()], &cyphertext);
        self.transport.enqueue(vec![packet], Staged::handshake(&staged)).await.map_err(
            |err| match err {
                SessionError::Aborted => HandshakeError::Aborted,
                SessionError::Storage(reason) => HandshakeError::Storage(reason),
                other => HandshakeError::Storage(other.to_string()),
            },
        )?;
        guard.handshake = staged;
        Ok(secret)
    }

    async fn run_bob(&self) -> Result<Zeroizing<Vec<u8>>, HandshakeError> {
        {
            let guard = self.state.acquire("handshake check").await;
            if let Some(secret) = guard.handshake.secret() {
                return Ok(Zeroizing::new(secret.to_vec()));
            }
        }

        let Some(cyphertext) = self.cyphertext.wait_for(Option::is_some).await else {
            return Err(HandshakeError::CorruptState("cyphertext vanished".into()));
        };
        tracing::debug!(
            session_id = %self.session_id,
            version = self.cyphertext.version(),
            "opening sealed secret"
        );
        let opened =
            handshake::open_initial_secret(&self.provider, &*self.local, &*self.remote, &cyphertext)
                .await;
        let secret = match opened {
            Ok(secret) => secret,
            Err(err) => {
                self.discard_cyphertext().await;
                return Err(err);
            },
        };

        let mut guard = self.state.acquire("handshake open").await;
        let mut staged = guard.handshake.clone();
        staged.complete(&secret)?;
        self.storage.store_handshake(self.session_id, &staged)?;
        guard.handshake = staged;
        Ok(secret)
    }

    /// Forget a sealed secret that did not open, so a session constructed
    /// later from the same storage waits for a genuine one.
    async fn discard_cyphertext(&self) {
        let mut guard = self.state.acquire("handshake discard").await;
        let mut staged = guard.handshake.clone();
        staged.discard_cyphertext();
        match self.storage.store_handshake(self.session_id, &staged) {
            Ok(()) => guard.handshake = staged,
            Err(err) => tracing::warn!(
                session_id = %self.session_id,
                error = %err,
                "could not discard rejected handshake packet"
            ),
        }
    }

    /// Take in Alice's sealed secret. Returns false for duplicates.
    pub async fn accept_handshake_packet(&self, cyphertext: &[u8]) -> Result<bool, SessionError> {
        if self.is_alice {
            return Err(SessionError::UnexpectedPacket { kind: PacketKind::Handshake.to_byte() });
        }

        let mut guard = self.state.acquire("handshake receive").await;
        let mut staged = guard.handshake.clone();
        if !staged.record_cyphertext(cyphertext) {
            tracing::debug!(session_id = %self.session_id, "dropping duplicate handshake packet");
            return Ok(false);
        }
        self.storage.store_handshake(self.session_id, &staged)?;
        guard.handshake = staged;
        self.cyphertext.set(Some(cyphertext.to_vec()));
        Ok(true)
    }

    /// Hold `packet` if it arrived before Bob received the sealed secret.
    /// Returns true if held.
    pub async fn defer_until_keyed(&self, packet: &[u8]) -> bool {
        let guard = self.state.acquire("defer packet").await;
        if !guard.handshake.awaiting_cyphertext() {
            return false;
        }

        if self.pending.len() >= self.config.reorder_window as usize {
            tracing::warn!(
                session_id = %self.session_id,
                pending = self.pending.len(),
                "too many packets before handshake, dropping"
            );
        } else {
            self.pending.push(packet.to_vec());
        }
        true
    }

    /// Packets held while waiting for the secret. Deferral stops once the
    /// sealed secret is recorded, so one take after establishment gets them
    /// all.
    pub fn take_pending(&self) -> Vec<Vec<u8>> {
        self.pending.take_all()
    }

    /// True if the handshake can complete without waiting for the peer:
    /// always for Alice, and for a Bob that already holds the sealed secret.
    pub async fn can_establish(&self) -> bool {
        if self.is_alice {
            return true;
        }
        let guard = self.state.acquire("establish check").await;
        !guard.handshake.awaiting_cyphertext()
    }

    /// Signal that the handshake completed and held packets were processed.
    pub fn resolve_initial_messages(&self, result: Result<(), SessionError>) {
        self.initial_messages_processed.resolve(result);
    }

    /// Wait for [`resolve_initial_messages`](Self::resolve_initial_messages)
    /// or a failure.
    pub async fn initial_messages_processed(&self) -> Result<(), SessionError> {
        self.initial_messages_processed.wait().await
    }

    /// Fail fast once aborted.
    pub fn ensure_live(&self) -> Result<(), SessionError> {
        if self.transport.is_aborted() { Err(SessionError::Aborted) } else { Ok(()) }
    }

    /// Abort the session. Pending handshake waits fail instead of hanging.
    pub async fn abort(&self) {
        tracing::info!(session_id = %self.session_id, "session aborted");
        self.transport.abort().await;
        self.initial_messages_processed.resolve(Err(SessionError::Aborted));
    }

    /// Queue an accepted frame for reporting. Called under the state lock,
    /// so the inbox order is the acceptance order.
    pub fn stage(&self, delivery: Delivery) {
        self.inbox.push(delivery);
    }

    /// Report staged frames in order: raw packet first, then plaintext.
    ///
    /// Must be called without the state lock held, so the transport may call
    /// back into the session from `process`. If another call is already
    /// reporting, it picks up what was staged here.
    pub async fn deliver_staged(&self) {
        loop {
            let Some(reporting) = self.delivering.try_acquire() else { return };
            while let Some(delivery) = self.inbox.pop_front() {
                self.deliver(delivery).await;
            }
            drop(reporting);

            // Staged after the drain ended but before the lock was released
            if self.inbox.is_empty() {
                return;
            }
        }
    }

    async fn deliver(&self, delivery: Delivery) {
        let Delivery { packet, plaintext, timestamp, instance_id } = delivery;
        let sender = self.remote.peer_id();
        self.transport.process(&sender, Processed::Cyphertext(packet)).await;
        self.transport
            .process(
                &sender,
                Processed::Plaintext(DecryptedMessage { plaintext, timestamp, instance_id }),
            )
            .await;
    }

    /// Flush after a receive produced control packets. Delivery failures
    /// leave them queued and do not fail the receive.
    pub async fn flush_quietly(&self) {
        if let Err(err) = self.transport.flush().await {
            tracing::warn!(session_id = %self.session_id, error = %err, "flush after receive failed");
        }
    }
}
