//! A send whose state change could not be stored leaves no trace: nothing
//! on the wire, nothing in the stored queue, no message id consumed.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use castle_core::{
    Commit, HandshakeState, MemoryStorage, RatchetRecord, SessionConfig, SessionError, SessionId,
    Storage, StorageError,
};
use castle_harness::{ChaoticStorage, PartySpec, ReliableRelay, SessionPair, TestIdentity};

/// Refuses every write that touches the outgoing queue while armed. State
/// records on their own are still written.
#[derive(Clone, Default)]
struct QueueWritesFail {
    inner: MemoryStorage,
    armed: Arc<AtomicBool>,
}

impl QueueWritesFail {
    fn arm(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.armed.load(Ordering::SeqCst) {
            return Err(StorageError::Io("queue write refused".into()));
        }
        Ok(())
    }
}

impl Storage for QueueWritesFail {
    fn load_handshake(&self, id: SessionId) -> Result<Option<HandshakeState>, StorageError> {
        self.inner.load_handshake(id)
    }

    fn store_handshake(&self, id: SessionId, state: &HandshakeState) -> Result<(), StorageError> {
        self.inner.store_handshake(id, state)
    }

    fn load_ratchet(&self, id: SessionId) -> Result<Option<RatchetRecord>, StorageError> {
        self.inner.load_ratchet(id)
    }

    fn store_ratchet(&self, id: SessionId, record: &RatchetRecord) -> Result<(), StorageError> {
        self.inner.store_ratchet(id, record)
    }

    fn load_outgoing(&self, id: SessionId) -> Result<Vec<Vec<u8>>, StorageError> {
        self.inner.load_outgoing(id)
    }

    fn store_outgoing(&self, id: SessionId, packets: &[Vec<u8>]) -> Result<(), StorageError> {
        self.check()?;
        self.inner.store_outgoing(id, packets)
    }

    fn store_commit(&self, id: SessionId, commit: Commit<'_>) -> Result<(), StorageError> {
        self.check()?;
        self.inner.store_commit(id, commit)
    }

    fn clear(&self, id: SessionId) -> Result<(), StorageError> {
        self.inner.clear(id)
    }
}

fn parties<S: Storage>(alice: S, bob: S) -> (PartySpec<S>, PartySpec<S>) {
    (
        PartySpec {
            identity: TestIdentity::new("alice", 1),
            peer: TestIdentity::new("bob", 2).public(),
            storage: alice,
        },
        PartySpec {
            identity: TestIdentity::new("bob", 2),
            peer: TestIdentity::new("alice", 1).public(),
            storage: bob,
        },
    )
}

async fn queue_failing_pair(config: SessionConfig, seed: u64) -> SessionPair<QueueWritesFail> {
    let (alice, bob) = parties(QueueWritesFail::default(), QueueWritesFail::default());
    SessionPair::open_with(
        config,
        seed,
        alice,
        bob,
        Box::new(ReliableRelay),
        Box::new(ReliableRelay),
    )
    .await
    .unwrap()
}

type Flaky = ChaoticStorage<MemoryStorage>;

/// Pair whose storage fails every write once enabled.
async fn flaky_pair(config: SessionConfig, seed: u64) -> SessionPair<Flaky> {
    let alice_storage = ChaoticStorage::with_seed(MemoryStorage::new(), 1.0, seed);
    let bob_storage = ChaoticStorage::with_seed(MemoryStorage::new(), 1.0, seed);
    alice_storage.set_enabled(false);
    bob_storage.set_enabled(false);

    let (alice, bob) = parties(alice_storage, bob_storage);
    SessionPair::open_with(
        config,
        seed,
        alice,
        bob,
        Box::new(ReliableRelay),
        Box::new(ReliableRelay),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn failed_send_queues_nothing() {
    for config in [SessionConfig::ratchet(2), SessionConfig::lite()] {
        let mut pair = queue_failing_pair(config, 1).await;
        pair.pump().await;
        pair.alice_sends(b"hello", 1.0).await.unwrap();

        pair.alice.storage.arm(true);
        let refused = pair.alice.session.send(b"pay 10", 2.0).await;
        assert!(matches!(refused, Err(SessionError::Storage(_))), "{refused:?}");
        assert_eq!(pair.alice.endpoint.wire_len(), 0);
        assert!(pair.alice.storage.load_outgoing(pair.session_id).unwrap().is_empty());

        pair.alice.storage.arm(false);
        pair.alice.session.flush().await.unwrap();
        pair.pump().await;
        assert_eq!(pair.bob.received(), vec![b"hello".to_vec()]);

        // The retry is the only copy that arrives
        pair.alice_sends(b"pay 10", 3.0).await.unwrap();
        assert_eq!(pair.bob.received(), vec![b"hello".to_vec(), b"pay 10".to_vec()]);
        assert!(pair.bob.receive_errors.is_empty(), "{:?}", pair.bob.receive_errors);
    }
}

#[tokio::test]
async fn restart_after_failed_send_keeps_message_ids_contiguous() {
    let mut pair = queue_failing_pair(SessionConfig::ratchet(3), 2).await;
    pair.pump().await;
    pair.alice_sends(b"zero", 0.0).await.unwrap();

    pair.alice.storage.arm(true);
    assert!(pair.alice.session.send(b"lost", 1.0).await.is_err());
    pair.alice.storage.arm(false);

    pair.reopen_alice().await.unwrap();
    let bodies: Vec<Vec<u8>> = (1..=4u8).map(|i| vec![b'm', i]).collect();
    for (i, body) in bodies.iter().enumerate() {
        pair.alice_sends(body, 2.0 + i as f64).await.unwrap();
    }

    let mut expected = vec![b"zero".to_vec()];
    expected.extend(bodies);
    assert_eq!(pair.bob.received(), expected);

    // Nothing waits above a gap
    let bob = pair.bob.snapshot().await.unwrap();
    assert_eq!(bob.buffered, 0);
    let alice = pair.alice.snapshot().await.unwrap();
    assert_eq!(bob.incoming_message_id + 1, alice.outgoing_message_id);
}

#[tokio::test]
async fn failed_receive_reports_nothing() {
    let mut pair = flaky_pair(SessionConfig::ratchet(2), 3).await;
    pair.pump().await;
    pair.alice.session.send(b"first", 1.0).await.unwrap();
    let wire = pair.alice.endpoint.take_wire();

    let bob_storage = pair.bob.storage.clone();
    bob_storage.set_enabled(true);
    for packet in &wire {
        assert!(pair.bob.session.receive(packet).await.is_err());
    }
    assert!(pair.bob.received().is_empty());
    assert_eq!(pair.bob.endpoint.wire_len(), 0);

    // Redelivery after the store recovers is accepted once
    bob_storage.set_enabled(false);
    for packet in &wire {
        pair.bob.session.receive(packet).await.unwrap();
    }
    assert_eq!(pair.bob.received(), vec![b"first".to_vec()]);
}
