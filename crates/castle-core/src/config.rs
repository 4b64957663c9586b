//! Session configuration.

use serde::{Deserialize, Serialize};

/// Messages sent under one ratchet generation before a rotation is proposed.
pub const DEFAULT_ROTATION_THRESHOLD: u32 = 100;

/// How far beyond the incoming watermark a message id may be and still be
/// buffered for in-order delivery.
pub const DEFAULT_REORDER_WINDOW: u32 = 128;

/// Ratchet updates for future generations held while a rotation is in
/// flight.
pub const DEFAULT_MAX_DEFERRED_UPDATES: usize = 8;

/// Superseded peer instance ids remembered for stale-traffic rejection.
pub const DEFAULT_MAX_STALE_INSTANCES: usize = 8;

/// Which pairwise session implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionVariant {
    /// Static key from the handshake. No forward secrecy.
    Lite,
    /// Continuously rotating keys with ordering and replay defense.
    #[default]
    Ratchet,
}

/// Session configuration. Both parties must agree on `variant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session implementation
    pub variant: SessionVariant,
    /// Messages per generation before proposing a rotation (ratchet only)
    pub rotation_threshold: u32,
    /// Bounded forward window for out-of-order arrivals (ratchet only)
    pub reorder_window: u32,
    /// Deferred ratchet updates kept while a rotation is in flight
    pub max_deferred_updates: usize,
    /// Retired peer instances remembered
    pub max_stale_instances: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            variant: SessionVariant::default(),
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            reorder_window: DEFAULT_REORDER_WINDOW,
            max_deferred_updates: DEFAULT_MAX_DEFERRED_UPDATES,
            max_stale_instances: DEFAULT_MAX_STALE_INSTANCES,
        }
    }
}

impl SessionConfig {
    /// Lite variant with default tuning.
    pub fn lite() -> Self {
        Self { variant: SessionVariant::Lite, ..Default::default() }
    }

    /// Ratchet variant rotating every `rotation_threshold` messages.
    pub fn ratchet(rotation_threshold: u32) -> Self {
        Self { variant: SessionVariant::Ratchet, rotation_threshold, ..Default::default() }
    }

    /// Threshold clamped to at least one message per generation.
    pub(crate) fn effective_rotation_threshold(&self) -> u32 {
        self.rotation_threshold.max(1)
    }
}
