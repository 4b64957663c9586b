//! Session transport adapter.
//!
//! The session never talks to the network. It hands sealed packets to a
//! caller-supplied [`Transport`] and reports what it decrypted back through
//! the same object. [`SessionTransport`] sits in between and owns the
//! durable outgoing queue: packets are persisted before delivery is
//! attempted and removed only once the transport accepted them, strictly
//! in enqueue order.
//!
//! New packets are persisted in the same [`Storage::store_commit`] as the
//! state change that produced them. A failed commit queues nothing, so a
//! packet whose message id was never recorded can never reach the wire.

use std::sync::Arc;

use async_trait::async_trait;
use castle_crypto::Zeroizing;

use crate::{
    error::{SessionError, TransportError},
    handshake::HandshakeState,
    identity::PeerId,
    ids::{InstanceId, SessionId},
    ratchet::RatchetRecord,
    storage::{Commit, Storage},
    sync::{AsyncList, Lock, Resolvable},
};

/// Plaintext decrypted from an authenticated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedMessage {
    /// Caller plaintext
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Timestamp the sender attached
    pub timestamp: f64,
    /// Sender's session instance
    pub instance_id: InstanceId,
}

/// What the session reports to the transport for an accepted frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Raw authenticated packet, reported before its plaintext
    Cyphertext(Vec<u8>),
    /// Decrypted caller plaintext
    Plaintext(DecryptedMessage),
}

/// External channel consumed by the session.
///
/// Implementations move opaque packets to the peer and call
/// [`Session::receive`](crate::Session::receive) with whatever arrives.
/// Retry and backoff policy belongs here, not in the session.
///
/// `process` is called after the session released its state lock, one call
/// at a time and in acceptance order, so it may call back into the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Handshake completed; the channel may start carrying packets.
    async fn connect(&self);

    /// Session is over; stop delivering.
    async fn abort(&self);

    /// Deliver one packet to the peer. On error the packet stays queued and
    /// is retried on the next flush.
    async fn send(&self, packet: &[u8]) -> Result<(), TransportError>;

    /// Report an accepted frame from `sender`.
    async fn process(&self, sender: &PeerId, message: Processed);
}

/// Session state persisted together with newly queued packets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Staged<'a> {
    /// Handshake state to store, if it changed
    pub handshake: Option<&'a HandshakeState>,
    /// Ratchet record to store, if it changed
    pub ratchet: Option<&'a RatchetRecord>,
}

impl<'a> Staged<'a> {
    /// Stage a handshake state.
    pub fn handshake(state: &'a HandshakeState) -> Self {
        Self { handshake: Some(state), ratchet: None }
    }

    /// Stage a ratchet record.
    pub fn ratchet(record: &'a RatchetRecord) -> Self {
        Self { handshake: None, ratchet: Some(record) }
    }
}

/// Bridges one session to its [`Transport`].
pub struct SessionTransport<S> {
    transport: Arc<dyn Transport>,
    storage: S,
    session_id: SessionId,
    outgoing: AsyncList<Vec<u8>>,
    flush_lock: Lock<()>,
    persist_lock: Lock<()>,
    connected: Resolvable<()>,
    aborted: Resolvable<()>,
}

impl<S: Storage> SessionTransport<S> {
    /// Adapter resuming the persisted outgoing queue of `session_id`.
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: S,
        session_id: SessionId,
    ) -> Result<Self, SessionError> {
        let outgoing = AsyncList::from_vec(storage.load_outgoing(session_id)?);
        Ok(Self {
            transport,
            storage,
            session_id,
            outgoing,
            flush_lock: Lock::new(()),
            persist_lock: Lock::new(()),
            connected: Resolvable::new(),
            aborted: Resolvable::new(),
        })
    }

    /// Append packets to the outgoing queue, persisting them in one write
    /// with `staged`.
    ///
    /// On error nothing is queued and nothing is stored: the caller keeps
    /// its previous state and the packets are never sent.
    pub async fn enqueue(
        &self,
        packets: Vec<Vec<u8>>,
        staged: Staged<'_>,
    ) -> Result<(), SessionError> {
        if self.is_aborted() {
            return Err(SessionError::Aborted);
        }

        let _guard = self.persist_lock.acquire("commit outgoing").await;
        let mut queued = self.outgoing.snapshot();
        queued.extend(packets.iter().cloned());
        self.storage.store_commit(
            self.session_id,
            Commit { handshake: staged.handshake, ratchet: staged.ratchet, outgoing: &queued },
        )?;
        self.outgoing.push_all(packets);
        Ok(())
    }

    /// Deliver queued packets in order until the queue is empty or the
    /// transport refuses one.
    ///
    /// A packet leaves the queue only after the transport accepted it. Does
    /// nothing until [`connect`](Self::connect) has been called. Errors only
    /// when the transport refuses a packet.
    pub async fn flush(&self) -> Result<(), SessionError> {
        if self.is_aborted() {
            return Err(SessionError::Aborted);
        }
        if !self.connected.is_resolved() {
            return Ok(());
        }

        let _guard = self.flush_lock.acquire("flush outgoing").await;
        while let Some(packet) = self.outgoing.front() {
            if let Err(err) = self.transport.send(&packet).await {
                tracing::warn!(
                    session_id = %self.session_id,
                    queued = self.outgoing.len(),
                    error = %err,
                    "transport refused packet, keeping it queued"
                );
                return Err(err.into());
            }
            self.outgoing.pop_front();

            // The packet is out; a stale stored queue only means a resend
            // after restart, which the peer drops as a replay
            if let Err(err) = self.persist().await {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %err,
                    "could not record delivered packet"
                );
            }
        }
        Ok(())
    }

    /// Tell the transport the handshake is complete.
    pub async fn connect(&self) {
        if self.connected.resolve(()) {
            self.transport.connect().await;
        }
    }

    /// Abort the transport. Later enqueues and flushes fail with
    /// [`SessionError::Aborted`].
    pub async fn abort(&self) {
        if self.aborted.resolve(()) {
            self.transport.abort().await;
        }
    }

    /// True once aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_resolved()
    }

    /// Resolves when the session is aborted.
    pub async fn aborted(&self) {
        self.aborted.wait().await;
    }

    /// Report an accepted frame.
    pub async fn process(&self, sender: &PeerId, message: Processed) {
        self.transport.process(sender, message).await;
    }

    /// Packets waiting for delivery.
    pub fn queued(&self) -> usize {
        self.outgoing.len()
    }

    async fn persist(&self) -> Result<(), SessionError> {
        let _guard = self.persist_lock.acquire("persist outgoing").await;
        self.storage.store_outgoing(self.session_id, &self.outgoing.snapshot())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::storage::MemoryStorage;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail_sends: Mutex<usize>,
        connects: Mutex<usize>,
        aborts: Mutex<usize>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(&self) {
            *self.connects.lock().unwrap() += 1;
        }

        async fn abort(&self) {
            *self.aborts.lock().unwrap() += 1;
        }

        async fn send(&self, packet: &[u8]) -> Result<(), TransportError> {
            let mut failures = self.fail_sends.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Delivery("link down".into()));
            }
            self.sent.lock().unwrap().push(packet.to_vec());
            Ok(())
        }

        async fn process(&self, _sender: &PeerId, _message: Processed) {}
    }

    const SESSION: SessionId = SessionId(3);

    fn adapter() -> (Arc<RecordingTransport>, MemoryStorage, SessionTransport<MemoryStorage>) {
        let transport = Arc::new(RecordingTransport::default());
        let storage = MemoryStorage::new();
        let adapter = SessionTransport::new(transport.clone(), storage.clone(), SESSION).unwrap();
        (transport, storage, adapter)
    }

    #[tokio::test]
    async fn nothing_is_sent_before_connect() {
        let (transport, storage, adapter) = adapter();
        adapter.enqueue(vec![vec![1], vec![2]], Staged::default()).await.unwrap();
        adapter.flush().await.unwrap();

        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(storage.load_outgoing(SESSION).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn flush_delivers_in_order_and_empties_storage() {
        let (transport, storage, adapter) = adapter();
        adapter.enqueue(vec![vec![1], vec![2]], Staged::default()).await.unwrap();
        adapter.enqueue(vec![vec![3]], Staged::default()).await.unwrap();
        adapter.connect().await;
        adapter.connect().await;
        adapter.flush().await.unwrap();

        assert_eq!(*transport.sent.lock().unwrap(), vec![vec![1], vec![2], vec![3]]);
        assert!(storage.load_outgoing(SESSION).unwrap().is_empty());
        assert_eq!(*transport.connects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn refused_packet_stays_at_the_front() {
        let (transport, storage, adapter) = adapter();
        *transport.fail_sends.lock().unwrap() = 1;
        adapter.connect().await;
        adapter.enqueue(vec![vec![1], vec![2]], Staged::default()).await.unwrap();

        let err = adapter.flush().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Delivery(_))));
        assert_eq!(storage.load_outgoing(SESSION).unwrap(), vec![vec![1], vec![2]]);

        adapter.flush().await.unwrap();
        assert_eq!(*transport.sent.lock().unwrap(), vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn queue_survives_reconstruction() {
        let (transport, storage, adapter) = adapter();
        adapter.enqueue(vec![vec![7]], Staged::default()).await.unwrap();
        drop(adapter);

        let resumed = SessionTransport::new(transport.clone(), storage, SESSION).unwrap();
        assert_eq!(resumed.queued(), 1);
        resumed.connect().await;
        resumed.flush().await.unwrap();
        assert_eq!(*transport.sent.lock().unwrap(), vec![vec![7]]);
    }

    #[tokio::test]
    async fn staged_state_is_stored_with_its_packets() {
        let (_, storage, adapter) = adapter();
        adapter.enqueue(vec![vec![1]], Staged::default()).await.unwrap();

        let mut state = HandshakeState::new(true);
        state.initial_secret_cyphertext = Some(vec![0xAB]);
        state.complete(&[5; 32]).unwrap();
        adapter.enqueue(vec![vec![2]], Staged::handshake(&state)).await.unwrap();

        let stored = storage.load_handshake(SESSION).unwrap().unwrap();
        assert_eq!(stored.secret(), Some([5u8; 32].as_slice()));
        assert_eq!(storage.load_outgoing(SESSION).unwrap(), vec![vec![1], vec![2]]);
        assert_eq!(adapter.queued(), 2);
    }

    #[tokio::test]
    async fn abort_blocks_further_traffic() {
        let (transport, _, adapter) = adapter();
        adapter.abort().await;
        adapter.abort().await;

        let refused = adapter.enqueue(vec![vec![1]], Staged::default()).await;
        assert_eq!(refused, Err(SessionError::Aborted));
        assert_eq!(adapter.flush().await, Err(SessionError::Aborted));
        assert_eq!(*transport.aborts.lock().unwrap(), 1);
    }
}
