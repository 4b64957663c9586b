//! Ratchet sessions under a hostile network and failing storage.
//!
//! The relay duplicates, delays and reorders packets but never loses one
//! for good. Whatever it does, every message must arrive exactly once and
//! in send order, and both sides must agree on their keys afterwards.

use castle_core::{MemoryStorage, SessionConfig};
use castle_harness::{
    ChaosConfig, ChaosRelay, ChaoticStorage, InvariantRegistry, PartySpec, ReliableRelay,
    SessionPair, Side, SystemSnapshot, TestIdentity, init_tracing,
};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

async fn chaotic_pair<S: castle_core::Storage>(
    config: SessionConfig,
    seed: u64,
    chaos: ChaosConfig,
    alice_storage: S,
    bob_storage: S,
) -> SessionPair<S> {
    let alice = TestIdentity::new("alice", 1);
    let bob = TestIdentity::new("bob", 2);
    let (alice_public, bob_public) = (alice.public(), bob.public());
    SessionPair::open_with(
        config,
        seed,
        PartySpec { identity: alice, peer: bob_public, storage: alice_storage },
        PartySpec { identity: bob, peer: alice_public, storage: bob_storage },
        Box::new(ChaosRelay::new(chaos, seed)),
        Box::new(ChaosRelay::new(chaos, seed ^ 0xFFFF)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn chaos_relay_preserves_exactly_once_in_order_delivery() {
    init_tracing();
    let chaos = ChaosConfig { duplicate_rate: 0.2, delay_rate: 0.2, reorder: true };

    for seed in 0..16u64 {
        let config = SessionConfig::ratchet(5);
        let registry = InvariantRegistry::standard(config.reorder_window);
        let mut pair =
            chaotic_pair(config, seed, chaos, MemoryStorage::new(), MemoryStorage::new()).await;
        pair.pump().await;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut system = SystemSnapshot::default();
        let (mut from_alice, mut from_bob) = (Vec::new(), Vec::new());

        for i in 0..80u32 {
            let body = i.to_be_bytes().to_vec();
            if rng.gen_bool(0.5) {
                pair.alice.session.send(&body, f64::from(i)).await.unwrap();
                from_alice.push(body);
            } else {
                pair.bob.session.send(&body, f64::from(i)).await.unwrap();
                from_bob.push(body);
            }
            // Let several sends pile up so batches get reordered
            if rng.gen_bool(0.3) {
                pair.pump().await;
                system.record(Side::Alice, pair.alice.snapshot().await.unwrap());
                system.record(Side::Bob, pair.bob.snapshot().await.unwrap());
                registry.assert_all(&system, &format!("seed {seed} message {i}"));
            }
        }
        pair.pump().await;

        assert_eq!(pair.bob.received(), from_alice, "seed {seed}");
        assert_eq!(pair.alice.received(), from_bob, "seed {seed}");
        assert!(pair.alice.receive_errors.is_empty(), "seed {seed}: {:?}", pair.alice.receive_errors);
        assert!(pair.bob.receive_errors.is_empty(), "seed {seed}: {:?}", pair.bob.receive_errors);

        let alice = pair.alice.snapshot().await.unwrap();
        let bob = pair.bob.snapshot().await.unwrap();
        assert_eq!(alice.generation, bob.generation, "seed {seed}");
        assert_eq!(alice.outgoing_fingerprint, bob.incoming_fingerprint, "seed {seed}");
    }
}

#[tokio::test]
async fn failing_sender_storage_never_reorders_or_duplicates() {
    init_tracing();

    for seed in 0..8u64 {
        let alice_storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.2, seed);
        let bob_storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, seed);
        alice_storage.set_enabled(false);

        let mut pair = SessionPair::open_with(
            SessionConfig::ratchet(4),
            seed,
            PartySpec {
                identity: TestIdentity::new("alice", 1),
                peer: TestIdentity::new("bob", 2).public(),
                storage: alice_storage.clone(),
            },
            PartySpec {
                identity: TestIdentity::new("bob", 2),
                peer: TestIdentity::new("alice", 1).public(),
                storage: bob_storage,
            },
            Box::new(ReliableRelay),
            Box::new(ReliableRelay),
        )
        .await
        .unwrap();
        pair.pump().await;
        alice_storage.set_enabled(true);

        let mut confirmed = Vec::new();
        for i in 0..60u32 {
            let body = i.to_be_bytes().to_vec();
            if pair.alice.session.send(&body, f64::from(i)).await.is_ok() {
                confirmed.push(body);
            }
            pair.pump().await;
        }

        alice_storage.set_enabled(false);
        pair.alice.session.flush().await.unwrap();
        pair.pump().await;

        // A refused send never reaches the peer, a confirmed one always does
        assert_eq!(pair.bob.received(), confirmed, "seed {seed}");
        assert!(alice_storage.failures() > 0, "seed {seed}: no failures injected");
    }
}

/// Alice sends `messages` bodies through a chaos relay while her storage
/// fails at `failure_rate`. Returns what Bob received and what Alice's
/// `send` confirmed.
async fn run_flaky_schedule(
    seed: u64,
    chaos: ChaosConfig,
    failure_rate: f64,
    threshold: u32,
    messages: u32,
    burst: u32,
) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let alice_storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);
    alice_storage.set_enabled(false);
    let bob_storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.0, seed);
    let mut pair = chaotic_pair(
        SessionConfig::ratchet(threshold),
        seed,
        chaos,
        alice_storage.clone(),
        bob_storage,
    )
    .await;
    pair.pump().await;
    alice_storage.set_enabled(true);

    let mut confirmed = Vec::new();
    for i in 0..messages {
        let body = i.to_be_bytes().to_vec();
        if pair.alice.session.send(&body, f64::from(i)).await.is_ok() {
            confirmed.push(body);
        }
        if (i + 1) % burst == 0 {
            pair.pump().await;
        }
    }

    alice_storage.set_enabled(false);
    pair.alice.session.flush().await.unwrap();
    pair.pump().await;
    (pair.bob.received(), confirmed)
}

#[test]
fn prop_confirmed_sends_arrive_exactly_once_in_order() {
    proptest!(ProptestConfig::with_cases(32), |(
        seed in any::<u64>(),
        duplicate_rate in 0.0..0.4,
        delay_rate in 0.0..0.4,
        failure_rate in 0.0..0.3,
        threshold in 1u32..8,
        messages in 1u32..40,
        burst in 1u32..5,
    )| {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let chaos = ChaosConfig { duplicate_rate, delay_rate, reorder: true };
        let (received, confirmed) = runtime.block_on(run_flaky_schedule(
            seed,
            chaos,
            failure_rate,
            threshold,
            messages,
            burst,
        ));

        prop_assert_eq!(received, confirmed);
    });
}
