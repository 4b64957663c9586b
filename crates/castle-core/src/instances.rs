//! Peer instance tracking.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::ids::InstanceId;

/// Outcome of observing a peer instance id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceVerdict {
    /// Same instance as the last live one (or the first seen)
    Live,
    /// A new instance superseded the previous live one
    Replaced {
        /// Instance that was retired
        previous: InstanceId,
    },
    /// Instance was already superseded; its traffic is discarded
    Stale,
}

/// Tracks which construction of the peer's session is live.
///
/// The most recent instance wins. Retired instances are remembered (up to a
/// bound, oldest forgotten first) so late frames from them are recognized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTracker {
    live: Option<InstanceId>,
    retired: VecDeque<InstanceId>,
}

impl InstanceTracker {
    /// No instance observed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live peer instance, if any frame has been seen.
    pub fn live(&self) -> Option<InstanceId> {
        self.live
    }

    /// Record a frame from `instance`.
    pub fn observe(&mut self, instance: InstanceId, max_retired: usize) -> InstanceVerdict {
        match self.live {
            Some(live) if live == instance => InstanceVerdict::Live,
            _ if self.retired.contains(&instance) => InstanceVerdict::Stale,
            Some(previous) => {
                self.retired.push_back(previous);
                while self.retired.len() > max_retired {
                    self.retired.pop_front();
                }
                self.live = Some(instance);
                InstanceVerdict::Replaced { previous }
            },
            None => {
                self.live = Some(instance);
                InstanceVerdict::Live
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(byte: u8) -> InstanceId {
        InstanceId::from_bytes([byte; 16])
    }

    #[test]
    fn newest_instance_wins() {
        let mut tracker = InstanceTracker::new();
        assert_eq!(tracker.observe(instance(1), 4), InstanceVerdict::Live);
        assert_eq!(tracker.observe(instance(1), 4), InstanceVerdict::Live);
        assert_eq!(
            tracker.observe(instance(2), 4),
            InstanceVerdict::Replaced { previous: instance(1) }
        );
        assert_eq!(tracker.observe(instance(1), 4), InstanceVerdict::Stale);
        assert_eq!(tracker.live(), Some(instance(2)));
    }

    #[test]
    fn retired_set_is_bounded() {
        let mut tracker = InstanceTracker::new();
        for byte in 1..=4 {
            tracker.observe(instance(byte), 2);
        }

        // 1 was forgotten, 2 and 3 are remembered
        assert_eq!(tracker.observe(instance(3), 2), InstanceVerdict::Stale);
        assert!(matches!(tracker.observe(instance(1), 2), InstanceVerdict::Replaced { .. }));
    }
}
