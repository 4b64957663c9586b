//! Two sessions wired together through relays.

use std::sync::Arc;

use castle_core::{
    MemoryStorage, RatchetSnapshot, Session, SessionConfig, SessionContext, SessionError,
    SessionId, Storage, Transport, open_session,
};
use castle_crypto::SeededProvider;

use crate::{
    identity::{PublicIdentity, TestIdentity},
    relay::{Endpoint, Relay, ReliableRelay},
};

/// Upper bound on relay rounds per [`SessionPair::pump`]. Sessions that keep
/// answering each other forever trip it.
pub const MAX_PUMP_ROUNDS: usize = 1_000;

/// Session id used by pairs unless a test picks another.
pub const DEFAULT_SESSION_ID: SessionId = SessionId(0xC457_1E);

/// One side of a [`SessionPair`].
pub struct Party<S: Storage> {
    /// Long-term keys
    pub identity: TestIdentity,
    /// What this party believes about the peer
    pub peer: PublicIdentity,
    /// Transport the session talks to
    pub endpoint: Arc<Endpoint>,
    /// Persistence, kept for reconstruction
    pub storage: S,
    /// The session under test
    pub session: Box<dyn Session>,
    /// Errors returned by `receive` while pumping, in order
    pub receive_errors: Vec<SessionError>,
    is_alice: bool,
    seed: u64,
}

impl<S: Storage> Party<S> {
    /// Ratchet view of this party, if any.
    pub async fn snapshot(&self) -> Option<RatchetSnapshot> {
        self.session.ratchet_snapshot().await
    }

    /// Plaintexts delivered to this party, in order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.endpoint.plaintexts()
    }
}

/// Description of one party before its session is opened.
pub struct PartySpec<S> {
    /// Long-term keys
    pub identity: TestIdentity,
    /// What this party believes about the peer
    pub peer: PublicIdentity,
    /// Persistence
    pub storage: S,
}

/// Alice and Bob with a relay in each direction.
pub struct SessionPair<S: Storage = MemoryStorage> {
    /// Initiator
    pub alice: Party<S>,
    /// Responder
    pub bob: Party<S>,
    /// Shared session id
    pub session_id: SessionId,
    /// Shared configuration
    pub config: SessionConfig,
    to_bob: Box<dyn Relay>,
    to_alice: Box<dyn Relay>,
}

impl SessionPair<MemoryStorage> {
    /// Signed identities, memory storage, reliable relays.
    pub async fn open(config: SessionConfig, seed: u64) -> Result<Self, SessionError> {
        let alice = TestIdentity::new("alice", 1);
        let bob = TestIdentity::new("bob", 2);
        let (alice_public, bob_public) = (alice.public(), bob.public());
        Self::open_with(
            config,
            seed,
            PartySpec { identity: alice, peer: bob_public, storage: MemoryStorage::new() },
            PartySpec { identity: bob, peer: alice_public, storage: MemoryStorage::new() },
            Box::new(ReliableRelay),
            Box::new(ReliableRelay),
        )
        .await
    }
}

impl<S: Storage> SessionPair<S> {
    /// Open both sessions. Alice's handshake packet is left on her wire
    /// until the first [`pump`](Self::pump).
    pub async fn open_with(
        config: SessionConfig,
        seed: u64,
        alice: PartySpec<S>,
        bob: PartySpec<S>,
        to_bob: Box<dyn Relay>,
        to_alice: Box<dyn Relay>,
    ) -> Result<Self, SessionError> {
        let session_id = DEFAULT_SESSION_ID;
        let alice = open_party(alice, true, &config, session_id, seed).await?;
        let bob = open_party(bob, false, &config, session_id, seed.wrapping_add(1)).await?;
        Ok(Self { alice, bob, session_id, config, to_bob, to_alice })
    }

    /// Move packets between the parties until both wires are quiet and the
    /// relays hold nothing. Returns the number of packets delivered.
    pub async fn pump(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut to_bob = self.to_bob.route(self.alice.endpoint.take_wire());
            let mut to_alice = self.to_alice.route(self.bob.endpoint.take_wire());
            if to_bob.is_empty() && to_alice.is_empty() {
                to_bob = self.to_bob.release();
                to_alice = self.to_alice.release();
            }
            if to_bob.is_empty() && to_alice.is_empty() {
                return delivered;
            }

            delivered += to_bob.len() + to_alice.len();
            deliver(&mut self.bob, to_bob).await;
            deliver(&mut self.alice, to_alice).await;
        }

        tracing::warn!(delivered, "pump did not settle");
        delivered
    }

    /// Send from Alice and pump.
    pub async fn alice_sends(&mut self, plaintext: &[u8], timestamp: f64) -> Result<(), SessionError> {
        self.alice.session.send(plaintext, timestamp).await?;
        self.pump().await;
        Ok(())
    }

    /// Send from Bob and pump.
    pub async fn bob_sends(&mut self, plaintext: &[u8], timestamp: f64) -> Result<(), SessionError> {
        self.bob.session.send(plaintext, timestamp).await?;
        self.pump().await;
        Ok(())
    }

    /// Drop Alice's session and construct a new one from her storage.
    pub async fn reopen_alice(&mut self) -> Result<(), SessionError> {
        reopen(&mut self.alice, &self.config, self.session_id).await
    }

    /// Drop Bob's session and construct a new one from his storage.
    pub async fn reopen_bob(&mut self) -> Result<(), SessionError> {
        reopen(&mut self.bob, &self.config, self.session_id).await
    }
}

async fn deliver<S: Storage>(party: &mut Party<S>, packets: Vec<Vec<u8>>) {
    for packet in packets {
        if let Err(err) = party.session.receive(&packet).await {
            tracing::debug!(error = %err, "receive failed");
            party.receive_errors.push(err);
        }
    }
}

async fn open_party<S: Storage>(
    spec: PartySpec<S>,
    is_alice: bool,
    config: &SessionConfig,
    session_id: SessionId,
    seed: u64,
) -> Result<Party<S>, SessionError> {
    let endpoint = Arc::new(Endpoint::new());
    let session = open_session(context(
        &spec.identity,
        &spec.peer,
        spec.storage.clone(),
        endpoint.clone(),
        is_alice,
        config,
        session_id,
        seed,
    ))
    .await?;

    Ok(Party {
        identity: spec.identity,
        peer: spec.peer,
        endpoint,
        storage: spec.storage,
        session,
        receive_errors: Vec::new(),
        is_alice,
        seed,
    })
}

async fn reopen<S: Storage>(
    party: &mut Party<S>,
    config: &SessionConfig,
    session_id: SessionId,
) -> Result<(), SessionError> {
    // A new construction draws a new instance id
    party.seed = party.seed.wrapping_add(0x100);
    party.session = open_session(context(
        &party.identity,
        &party.peer,
        party.storage.clone(),
        party.endpoint.clone(),
        party.is_alice,
        config,
        session_id,
        party.seed,
    ))
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn context<S: Storage>(
    identity: &TestIdentity,
    peer: &PublicIdentity,
    storage: S,
    endpoint: Arc<Endpoint>,
    is_alice: bool,
    config: &SessionConfig,
    session_id: SessionId,
    seed: u64,
) -> SessionContext<SeededProvider, S> {
    let transport: Arc<dyn Transport> = endpoint;
    SessionContext {
        provider: SeededProvider::new(seed),
        storage,
        transport,
        local: Arc::new(identity.clone()),
        remote: Arc::new(peer.clone()),
        session_id,
        is_alice,
        config: config.clone(),
    }
}
