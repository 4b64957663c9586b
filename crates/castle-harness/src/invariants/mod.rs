//! Invariant checking over ratchet observations.
//!
//! Tests record a [`RatchetSnapshot`](castle_core::RatchetSnapshot) of each
//! party after every step into a [`SystemSnapshot`], then run the
//! registered [`Invariant`]s over the whole history. Invariants state what
//! must hold on every execution path, not the outcome of one scenario.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard(config.reorder_window);
//! system.record(Side::Alice, pair.alice.snapshot().await.unwrap());
//! registry.assert_all(&system, "after rotation");
//! ```

mod checks;
mod snapshot;

pub use checks::{BufferBound, GenerationMonotonicity, KeyAgreement, MessageIdMonotonicity};
pub use snapshot::{Side, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against recorded state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// `Ok(())` if the property holds over `state`.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the invariants every ratchet run must satisfy:
    ///
    /// - [`GenerationMonotonicity`]: generations never decrease
    /// - [`MessageIdMonotonicity`]: watermark and outgoing id never decrease
    /// - [`KeyAgreement`]: settled peers at one generation share keys
    /// - [`BufferBound`]: the incoming buffer fits the reorder window
    pub fn standard(reorder_window: u32) -> Self {
        let mut registry = Self::new();
        registry.add(GenerationMonotonicity);
        registry.add(MessageIdMonotonicity);
        registry.add(KeyAgreement);
        registry.add(BufferBound { reorder_window });
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Every violation found, or `Ok(())`.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
