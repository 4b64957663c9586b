//! Recorded ratchet observations.

use castle_core::RatchetSnapshot;

/// Which party an observation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Initiator
    Alice,
    /// Responder
    Bob,
}

/// Ratchet observations of both parties, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Alice's observations
    pub alice: Vec<RatchetSnapshot>,
    /// Bob's observations
    pub bob: Vec<RatchetSnapshot>,
}

impl SystemSnapshot {
    /// Append an observation.
    pub fn record(&mut self, side: Side, snapshot: RatchetSnapshot) {
        self.history_mut(side).push(snapshot);
    }

    /// Observations of one side.
    pub fn history(&self, side: Side) -> &[RatchetSnapshot] {
        match side {
            Side::Alice => &self.alice,
            Side::Bob => &self.bob,
        }
    }

    fn history_mut(&mut self, side: Side) -> &mut Vec<RatchetSnapshot> {
        match side {
            Side::Alice => &mut self.alice,
            Side::Bob => &mut self.bob,
        }
    }

    /// Latest observation of one side.
    pub fn latest(&self, side: Side) -> Option<&RatchetSnapshot> {
        self.history(side).last()
    }
}
