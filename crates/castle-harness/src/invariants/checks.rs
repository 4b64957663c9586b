//! Standard ratchet invariants.

use castle_core::{RatchetSnapshot, RotationPhase};

use super::{Invariant, InvariantResult, Side, SystemSnapshot, Violation};

const SIDES: [Side; 2] = [Side::Alice, Side::Bob];

fn violation(invariant: &'static str, message: String) -> InvariantResult {
    Err(Violation { invariant, message })
}

/// A party's generation never decreases.
pub struct GenerationMonotonicity;

impl Invariant for GenerationMonotonicity {
    fn name(&self) -> &'static str {
        "generation_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for side in SIDES {
            for window in state.history(side).windows(2) {
                if window[1].generation < window[0].generation {
                    return violation(
                        self.name(),
                        format!(
                            "{side:?}: generation decreased {} → {}",
                            window[0].generation, window[1].generation
                        ),
                    );
                }
            }
        }
        Ok(())
    }
}

/// The incoming watermark and the outgoing id never move back.
pub struct MessageIdMonotonicity;

impl Invariant for MessageIdMonotonicity {
    fn name(&self) -> &'static str {
        "message_id_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for side in SIDES {
            for window in state.history(side).windows(2) {
                let (before, after) = (&window[0], &window[1]);
                if after.incoming_message_id < before.incoming_message_id {
                    return violation(
                        self.name(),
                        format!(
                            "{side:?}: watermark decreased {} → {}",
                            before.incoming_message_id, after.incoming_message_id
                        ),
                    );
                }
                if after.outgoing_message_id < before.outgoing_message_id {
                    return violation(
                        self.name(),
                        format!(
                            "{side:?}: outgoing id decreased {} → {}",
                            before.outgoing_message_id, after.outgoing_message_id
                        ),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Parties that both sit idle at the same generation hold mirrored keys:
/// Alice's outgoing key is Bob's incoming key and the other way round.
pub struct KeyAgreement;

impl KeyAgreement {
    fn settled(snapshot: &RatchetSnapshot) -> bool {
        snapshot.rotation == RotationPhase::Idle
    }
}

impl Invariant for KeyAgreement {
    fn name(&self) -> &'static str {
        "key_agreement"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let (Some(alice), Some(bob)) = (state.latest(Side::Alice), state.latest(Side::Bob)) else {
            return Ok(());
        };
        if alice.generation != bob.generation || !Self::settled(alice) || !Self::settled(bob) {
            return Ok(());
        }

        if alice.outgoing_fingerprint != bob.incoming_fingerprint
            || alice.incoming_fingerprint != bob.outgoing_fingerprint
        {
            return violation(
                self.name(),
                format!("generation {}: key fingerprints differ", alice.generation),
            );
        }
        Ok(())
    }
}

/// The incoming buffer never holds more packets than the reorder window.
pub struct BufferBound {
    /// Configured reorder window
    pub reorder_window: u32,
}

impl Invariant for BufferBound {
    fn name(&self) -> &'static str {
        "buffer_bound"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for side in SIDES {
            for snapshot in state.history(side) {
                if snapshot.buffered > self.reorder_window as usize {
                    return violation(
                        self.name(),
                        format!(
                            "{side:?}: {} buffered packets exceed window {}",
                            snapshot.buffered, self.reorder_window
                        ),
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(generation: u32, incoming: u32, outgoing: u32) -> RatchetSnapshot {
        RatchetSnapshot {
            generation,
            incoming_message_id: incoming,
            outgoing_message_id: outgoing,
            rotation: RotationPhase::Idle,
            incoming_fingerprint: [1; 16],
            outgoing_fingerprint: [2; 16],
            buffered: 0,
            deferred_updates: 0,
        }
    }

    #[test]
    fn decreasing_generation_is_caught() {
        let mut state = SystemSnapshot::default();
        state.record(Side::Alice, snapshot(2, 0, 1));
        state.record(Side::Alice, snapshot(1, 0, 1));

        assert!(GenerationMonotonicity.check(&state).is_err());
    }

    #[test]
    fn decreasing_watermark_is_caught() {
        let mut state = SystemSnapshot::default();
        state.record(Side::Bob, snapshot(0, 5, 1));
        state.record(Side::Bob, snapshot(0, 4, 1));

        assert!(MessageIdMonotonicity.check(&state).is_err());
    }

    #[test]
    fn mirrored_keys_agree() {
        let mut state = SystemSnapshot::default();
        state.record(Side::Alice, snapshot(3, 0, 1));
        let mut bob = snapshot(3, 0, 1);
        bob.incoming_fingerprint = [2; 16];
        bob.outgoing_fingerprint = [1; 16];
        state.record(Side::Bob, bob);

        assert!(KeyAgreement.check(&state).is_ok());

        state.bob[0].incoming_fingerprint = [9; 16];
        assert!(KeyAgreement.check(&state).is_err());
    }

    #[test]
    fn oversized_buffer_is_caught() {
        let mut state = SystemSnapshot::default();
        let mut alice = snapshot(0, 0, 1);
        alice.buffered = 5;
        state.record(Side::Alice, alice);

        assert!(BufferBound { reorder_window: 4 }.check(&state).is_err());
        assert!(BufferBound { reorder_window: 5 }.check(&state).is_ok());
    }
}
