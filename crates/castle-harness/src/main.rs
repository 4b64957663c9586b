//! Castle session simulator.
//!
//! Runs a seeded conversation between two sessions over an in-memory relay
//! and reports how the ratchet evolved.
//!
//! # Usage
//!
//! ```bash
//! # 500 messages, rotation every 20, with duplication and reordering
//! castle-sim --messages 500 --rotation-threshold 20 --chaos
//!
//! # Lite variant, verbose session logs
//! RUST_LOG=castle_core=debug castle-sim --variant lite
//! ```

use castle_core::{MemoryStorage, SessionConfig, SessionVariant};
use castle_harness::{
    ChaosConfig, ChaosRelay, InvariantRegistry, PartySpec, Relay, ReliableRelay, SessionPair,
    Side, SystemSnapshot, TestIdentity,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Castle pairwise session simulator
#[derive(Parser, Debug)]
#[command(name = "castle-sim")]
#[command(about = "Simulate a Castle session between two in-memory parties")]
#[command(version)]
struct Args {
    /// Session variant
    #[arg(long, value_enum, default_value = "ratchet")]
    variant: Variant,

    /// Messages to send, alternating between Alice and Bob
    #[arg(short, long, default_value = "200")]
    messages: u32,

    /// Messages per generation before a rotation is proposed
    #[arg(long, default_value = "100")]
    rotation_threshold: u32,

    /// Seed for providers and relays
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Duplicate, delay and reorder packets (ratchet only)
    #[arg(long)]
    chaos: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Lite,
    Ratchet,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match args.variant {
        Variant::Lite => SessionConfig::lite(),
        Variant::Ratchet => SessionConfig::ratchet(args.rotation_threshold),
    };
    let chaos = args.chaos && config.variant == SessionVariant::Ratchet;
    let (to_bob, to_alice): (Box<dyn Relay>, Box<dyn Relay>) =
        if chaos {
            (
                Box::new(ChaosRelay::new(ChaosConfig::default(), args.seed)),
                Box::new(ChaosRelay::new(ChaosConfig::default(), args.seed.wrapping_add(1))),
            )
        } else {
            (Box::new(ReliableRelay), Box::new(ReliableRelay))
        };

    let alice = TestIdentity::new("alice", 1);
    let bob = TestIdentity::new("bob", 2);
    let (alice_public, bob_public) = (alice.public(), bob.public());
    let mut pair = SessionPair::open_with(
        config.clone(),
        args.seed,
        PartySpec { identity: alice, peer: bob_public, storage: MemoryStorage::new() },
        PartySpec { identity: bob, peer: alice_public, storage: MemoryStorage::new() },
        to_bob,
        to_alice,
    )
    .await?;
    pair.pump().await;

    tracing::info!(variant = ?config.variant, messages = args.messages, chaos, "simulation starting");

    let registry = InvariantRegistry::standard(config.reorder_window);
    let mut system = SystemSnapshot::default();
    for i in 0..args.messages {
        let body = format!("message {i}");
        let timestamp = 1_700_000_000_000.0 + f64::from(i);
        if i % 2 == 0 {
            pair.alice.session.send(body.as_bytes(), timestamp).await?;
        } else {
            pair.bob.session.send(body.as_bytes(), timestamp).await?;
        }
        pair.pump().await;

        if let (Some(alice), Some(bob)) = (pair.alice.snapshot().await, pair.bob.snapshot().await) {
            system.record(Side::Alice, alice);
            system.record(Side::Bob, bob);
        }
    }

    if let Err(violations) = registry.check_all(&system) {
        for violation in &violations {
            tracing::error!(%violation, "invariant violated");
        }
        return Err(format!("{} invariant violations", violations.len()).into());
    }

    let received = (pair.alice.received().len(), pair.bob.received().len());
    tracing::info!(alice_received = received.0, bob_received = received.1, "delivery complete");
    if let Some(snapshot) = pair.alice.snapshot().await {
        tracing::info!(
            generation = snapshot.generation,
            outgoing = snapshot.outgoing_message_id,
            watermark = snapshot.incoming_message_id,
            "alice ratchet"
        );
    }
    let errors = pair.alice.receive_errors.len() + pair.bob.receive_errors.len();
    if errors > 0 {
        tracing::warn!(errors, "receive errors during run");
    }

    Ok(())
}
