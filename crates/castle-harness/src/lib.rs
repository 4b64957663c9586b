//! Deterministic test harness for Castle sessions.
//!
//! Two sessions talk through in-memory [`Endpoint`]s. Nothing moves until
//! the test calls [`SessionPair::pump`], which routes packets through a
//! [`Relay`]: [`ReliableRelay`] for plain delivery, [`ChaosRelay`] for
//! seeded duplication, delay and reordering. Every source of randomness
//! (providers, relays, [`ChaoticStorage`]) is seeded, so a failing run
//! replays exactly from its seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks ratchet observations recorded during a
//! run. Use [`InvariantRegistry::standard`] for the properties every run
//! must satisfy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
pub mod identity;
pub mod invariants;
pub mod pair;
pub mod relay;

pub use chaotic::ChaoticStorage;
pub use identity::{PublicIdentity, TestIdentity};
pub use invariants::{
    BufferBound, GenerationMonotonicity, Invariant, InvariantRegistry, InvariantResult,
    KeyAgreement, MessageIdMonotonicity, Side, SystemSnapshot, Violation,
};
pub use pair::{DEFAULT_SESSION_ID, MAX_PUMP_ROUNDS, Party, PartySpec, SessionPair};
pub use relay::{ChaosConfig, ChaosRelay, Endpoint, Relay, ReliableRelay};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a log subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(filter)
        .try_init();
}
