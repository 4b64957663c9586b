use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where an incoming message id falls relative to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// At or below the watermark: already accepted
    Replay,
    /// Exactly watermark + 1: process now
    Next,
    /// Ahead of the watermark but within the window: hold until the gap closes
    Ahead,
    /// Beyond the window: drop
    Overflow,
}

impl Arrival {
    /// Classify `message_id` against `watermark` and a forward `window`.
    pub fn classify(watermark: u32, message_id: u32, window: u32) -> Self {
        let watermark = u64::from(watermark);
        let id = u64::from(message_id);

        if id <= watermark {
            Self::Replay
        } else if id == watermark + 1 {
            Self::Next
        } else if id - watermark <= u64::from(window) {
            Self::Ahead
        } else {
            Self::Overflow
        }
    }
}

/// Out-of-order arrivals waiting for the gap below them to close.
///
/// Holds raw packets keyed by message id. Only packets that already passed
/// AEAD authentication are inserted, so a forged packet cannot occupy the
/// slot of a genuine one. Each id is held at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingBuffer {
    queue: BTreeMap<u32, Vec<u8>>,
}

impl IncomingBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a packet. Returns false (and keeps the first copy) if the id is
    /// already held.
    pub fn insert(&mut self, message_id: u32, packet: Vec<u8>) -> bool {
        if self.queue.contains_key(&message_id) {
            return false;
        }
        self.queue.insert(message_id, packet);
        true
    }

    /// Remove the packet held for `message_id`.
    pub fn take(&mut self, message_id: u32) -> Option<Vec<u8>> {
        self.queue.remove(&message_id)
    }

    /// Drop everything at or below `watermark`.
    pub fn prune(&mut self, watermark: u32) {
        self.queue = self.queue.split_off(&watermark.saturating_add(1));
        if watermark == u32::MAX {
            self.queue.clear();
        }
    }

    /// Number of held packets.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Held ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.queue.keys().copied().collect()
    }
}
