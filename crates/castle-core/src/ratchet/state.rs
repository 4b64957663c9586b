use std::{collections::VecDeque, fmt};

use castle_crypto::{
    EncryptionKeyPair, FINGERPRINT_SIZE, PrimitiveProvider, PublicEncryptionKey, SymmetricKey,
    Zeroizing, derive_key, derive_key_pair, key_fingerprint,
};
use serde::{Deserialize, Serialize};

use super::update::{RatchetUpdate, UpdateStep};
use crate::{
    error::SessionError,
    frame::{RatchetHeader, assemble},
    ids::SessionId,
};

const LABEL_ALICE: &[u8] = b"castle-ratchet-alice";
const LABEL_BOB: &[u8] = b"castle-ratchet-bob";
const LABEL_NEXT: &[u8] = b"castle-ratchet-next";

/// First outgoing message id. Zero is reserved as "nothing received yet".
pub const FIRST_MESSAGE_ID: u32 = 1;

/// Remaining outgoing ids at which a rotation opens regardless of the
/// threshold. Ids never reset, so the last generation before exhaustion is
/// kept short.
pub const WRAP_MARGIN: u32 = 1 << 16;

/// Incoming and outgoing keys of one generation.
#[derive(Clone, Serialize, Deserialize)]
pub struct SymmetricKeys {
    incoming: SymmetricKey,
    outgoing: SymmetricKey,
}

impl SymmetricKeys {
    /// Generation 0 keys. Alice's outgoing key is Bob's incoming key.
    pub fn initial(secret: &[u8], is_alice: bool) -> Self {
        let alice = derive_key(secret, None, LABEL_ALICE);
        let bob = derive_key(secret, None, LABEL_BOB);
        Self::from_canonical(alice, bob, is_alice)
    }

    fn from_canonical(alice: SymmetricKey, bob: SymmetricKey, is_alice: bool) -> Self {
        if is_alice {
            Self { incoming: bob, outgoing: alice }
        } else {
            Self { incoming: alice, outgoing: bob }
        }
    }

    /// (Alice's sending key, Bob's sending key), identical on both sides.
    fn canonical(&self, is_alice: bool) -> (&SymmetricKey, &SymmetricKey) {
        if is_alice { (&self.outgoing, &self.incoming) } else { (&self.incoming, &self.outgoing) }
    }

    /// Keys of the following generation: HKDF over the exchange output,
    /// salted with this generation's keys.
    fn derive_next<P: PrimitiveProvider>(
        &self,
        provider: &P,
        shared: &[u8],
        is_alice: bool,
    ) -> Self {
        let (alice, bob) = self.canonical(is_alice);
        let salt = provider.concat(&[alice.as_bytes(), bob.as_bytes()]);
        let (alice, bob) = derive_key_pair(shared, Some(&salt), LABEL_NEXT);
        Self::from_canonical(alice, bob, is_alice)
    }

    /// Key used to open frames from the peer.
    pub fn incoming(&self) -> &SymmetricKey {
        &self.incoming
    }

    /// Key used to seal frames to the peer.
    pub fn outgoing(&self) -> &SymmetricKey {
        &self.outgoing
    }
}

impl fmt::Debug for SymmetricKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKeys(..)")
    }
}

/// Current keys plus the pre-computed keys of a rotation in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymmetricState {
    current: SymmetricKeys,
    next: Option<SymmetricKeys>,
}

/// Progress of the rotation from `generation` to `generation + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationPhase {
    /// No rotation in flight
    Idle,
    /// We proposed and wait for the peer's key
    Proposed,
    /// Next keys are computed and wait for promotion
    Prepared {
        /// True once we seal under the next generation (the initiator after
        /// acknowledging). The responder keeps sealing under the current
        /// generation until it is promoted.
        sending_next: bool,
    },
}

/// Result of accepting a frame sealed under the next generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promotion {
    /// Generation now current
    pub generation: u32,
    /// The peer is still sealing under its next keys and waits for our
    /// first frame under this generation
    pub confirm: bool,
}

/// Inspection view of a ratchet, safe to log or compare in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatchetSnapshot {
    /// Generation of the current keys
    pub generation: u32,
    /// Highest contiguous peer message id accepted
    pub incoming_message_id: u32,
    /// Id the next sealed frame will carry
    pub outgoing_message_id: u32,
    /// Rotation progress
    pub rotation: RotationPhase,
    /// Fingerprint of the current incoming key
    pub incoming_fingerprint: [u8; FINGERPRINT_SIZE],
    /// Fingerprint of the current outgoing key
    pub outgoing_fingerprint: [u8; FINGERPRINT_SIZE],
    /// Out-of-order packets waiting for the gap to close
    pub buffered: usize,
    /// Updates deferred for a later generation
    pub deferred_updates: usize,
}

/// Ratchet state of one side of a session.
///
/// # Invariants
///
/// - `outgoing_message_id` starts at 1 and grows by exactly one per sealed
///   frame
/// - `incoming_message_id` only grows, one accepted frame at a time
/// - `symmetric.next` is present iff `rotation` is `Prepared`
/// - `asymmetric` is present iff `rotation` is `Proposed`
/// - Frames we seal never move back a generation
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetState {
    is_alice: bool,
    asymmetric: Option<EncryptionKeyPair>,
    generation: u32,
    incoming_message_id: u32,
    outgoing_message_id: u32,
    symmetric: SymmetricState,
    rotation: RotationPhase,
    sent_since_rotation: u32,
    update_queue: VecDeque<RatchetUpdate>,
}

impl RatchetState {
    /// Fresh state at generation 0.
    pub fn new(secret: &[u8], is_alice: bool) -> Self {
        Self {
            is_alice,
            asymmetric: None,
            generation: 0,
            incoming_message_id: 0,
            outgoing_message_id: FIRST_MESSAGE_ID,
            symmetric: SymmetricState {
                current: SymmetricKeys::initial(secret, is_alice),
                next: None,
            },
            rotation: RotationPhase::Idle,
            sent_since_rotation: 0,
            update_queue: VecDeque::new(),
        }
    }

    /// Generation of the current keys.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Highest contiguous peer message id accepted (the watermark).
    pub fn incoming_message_id(&self) -> u32 {
        self.incoming_message_id
    }

    /// Id the next sealed frame will carry.
    pub fn outgoing_message_id(&self) -> u32 {
        self.outgoing_message_id
    }

    /// Rotation progress.
    pub fn rotation(&self) -> RotationPhase {
        self.rotation
    }

    /// Current keys.
    pub fn current_keys(&self) -> &SymmetricKeys {
        &self.symmetric.current
    }

    /// Updates waiting for a later generation.
    pub fn deferred_updates(&self) -> usize {
        self.update_queue.len()
    }

    pub(crate) fn snapshot(&self, buffered: usize) -> RatchetSnapshot {
        RatchetSnapshot {
            generation: self.generation,
            incoming_message_id: self.incoming_message_id,
            outgoing_message_id: self.outgoing_message_id,
            rotation: self.rotation,
            incoming_fingerprint: key_fingerprint(self.symmetric.current.incoming()),
            outgoing_fingerprint: key_fingerprint(self.symmetric.current.outgoing()),
            buffered,
            deferred_updates: self.update_queue.len(),
        }
    }

    /// Message ids left before the outgoing id space is exhausted.
    pub fn remaining_message_ids(&self) -> u32 {
        u32::MAX - self.outgoing_message_id
    }

    /// True if the next send should open a rotation: the threshold is
    /// reached or the id space is close to wrapping.
    pub fn should_rotate(&self, threshold: u32) -> bool {
        let due = self.sent_since_rotation >= threshold
            || (self.sent_since_rotation > 0 && self.remaining_message_ids() <= WRAP_MARGIN);
        self.rotation == RotationPhase::Idle && due && self.generation < u32::MAX
    }

    /// Open a rotation: draw a fresh exchange pair and return the proposal
    /// to seal under the current generation.
    pub fn propose<P: PrimitiveProvider>(&mut self, provider: &P) -> RatchetUpdate {
        let pair = provider.generate_exchange_key_pair();
        let update = RatchetUpdate {
            generation: self.generation + 1,
            step: UpdateStep::Propose(pair.public_key()),
        };
        self.asymmetric = Some(pair);
        self.rotation = RotationPhase::Proposed;
        update
    }

    /// Seal a frame under the generation we currently send with and
    /// allocate its message id. Returns the full packet.
    pub fn seal<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        frame: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        if self.outgoing_message_id == u32::MAX {
            return Err(SessionError::Overflow);
        }

        let (generation, keys) = match (&self.rotation, &self.symmetric.next) {
            (RotationPhase::Prepared { sending_next: true }, Some(next)) => {
                (self.generation + 1, next)
            },
            _ => (self.generation, &self.symmetric.current),
        };

        let header = RatchetHeader { generation, message_id: self.outgoing_message_id };
        let aad = header.to_bytes();
        let sealed = provider.seal(frame, keys.outgoing(), &aad);

        self.outgoing_message_id += 1;
        self.sent_since_rotation = self.sent_since_rotation.saturating_add(1);
        Ok(assemble(&aad, &sealed))
    }

    /// Authenticate and decrypt against the key set the header names.
    ///
    /// Only the current generation and, while a rotation is prepared, the
    /// next one are accepted. Superseded keys are gone.
    pub fn open<P: PrimitiveProvider>(
        &self,
        provider: &P,
        header: &RatchetHeader,
        sealed: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        let keys = if header.generation == self.generation {
            &self.symmetric.current
        } else if let Some(next) = self
            .symmetric
            .next
            .as_ref()
            .filter(|_| Some(header.generation) == self.generation.checked_add(1))
        {
            next
        } else {
            return Err(SessionError::UnknownGeneration {
                generation: header.generation,
                current: self.generation,
            });
        };

        Ok(provider.open(sealed, keys.incoming(), &header.to_bytes())?)
    }

    /// Advance the watermark past an opened frame. A frame under the next
    /// generation promotes it to current.
    pub fn accept(&mut self, header: &RatchetHeader) -> Option<Promotion> {
        debug_assert_eq!(Some(header.message_id), self.incoming_message_id.checked_add(1));
        self.incoming_message_id = header.message_id;

        if header.generation == self.generation {
            return None;
        }
        self.promote()
    }

    fn promote(&mut self) -> Option<Promotion> {
        let next = self.symmetric.next.take()?;
        let confirm = self.rotation == RotationPhase::Prepared { sending_next: false };

        // Superseded keys and any leftover exchange pair zeroize on drop
        drop(std::mem::replace(&mut self.symmetric.current, next));
        self.asymmetric = None;
        self.generation += 1;
        self.rotation = RotationPhase::Idle;
        self.sent_since_rotation = 0;

        Some(Promotion { generation: self.generation, confirm })
    }

    /// Queue an update and apply every queued update that is due.
    ///
    /// Returns the updates to send in reply, in order. Updates for a
    /// generation beyond the next one wait in the queue (at most
    /// `max_deferred` of them); stale, duplicate and out-of-place updates
    /// are dropped with a log line.
    pub fn handle_update<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        update: RatchetUpdate,
        max_deferred: usize,
        session_id: SessionId,
    ) -> Vec<RatchetUpdate> {
        if self.update_queue.len() >= max_deferred && self.is_future(&update) {
            tracing::warn!(
                %session_id,
                generation = update.generation,
                current = self.generation,
                "deferred update queue full, dropping ratchet update"
            );
            return Vec::new();
        }
        self.update_queue.push_back(update);
        self.pump_updates(provider, session_id)
    }

    /// Apply queued updates from the front while they are due.
    pub fn pump_updates<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        session_id: SessionId,
    ) -> Vec<RatchetUpdate> {
        let mut replies = Vec::new();
        while let Some(update) = self.update_queue.front() {
            if self.is_future(update) {
                break;
            }
            let Some(update) = self.update_queue.pop_front() else { break };
            replies.extend(self.apply(provider, update, session_id));
        }
        replies
    }

    fn is_future(&self, update: &RatchetUpdate) -> bool {
        u64::from(update.generation) > u64::from(self.generation) + 1
    }

    fn apply<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        update: RatchetUpdate,
        session_id: SessionId,
    ) -> Option<RatchetUpdate> {
        let current = self.generation;

        if update.generation <= current {
            if update.generation == current && update.step == UpdateStep::Acknowledge {
                tracing::debug!(%session_id, generation = current, "rotation confirmed by peer");
            } else {
                tracing::debug!(
                    %session_id,
                    generation = update.generation,
                    current,
                    "dropping stale ratchet update"
                );
            }
            return None;
        }

        match (update.step, self.rotation) {
            (UpdateStep::Propose(peer), RotationPhase::Idle) => {
                let pair = provider.generate_exchange_key_pair();
                self.prepare(provider, &pair, &peer, false, session_id)?;
                Some(RatchetUpdate {
                    generation: update.generation,
                    step: UpdateStep::Respond(pair.public_key()),
                })
            },
            (UpdateStep::Propose(peer), RotationPhase::Proposed) => {
                // Both sides proposed at once: Alice's proposal stands and Bob
                // answers it with the key he already advertised.
                if self.is_alice {
                    tracing::debug!(
                        %session_id,
                        generation = update.generation,
                        "simultaneous proposal, keeping ours"
                    );
                    return None;
                }
                let pair = self.asymmetric.take()?;
                self.prepare(provider, &pair, &peer, false, session_id)?;
                Some(RatchetUpdate {
                    generation: update.generation,
                    step: UpdateStep::Respond(pair.public_key()),
                })
            },
            (UpdateStep::Respond(peer), RotationPhase::Proposed) => {
                let pair = self.asymmetric.take()?;
                self.prepare(provider, &pair, &peer, true, session_id)?;
                Some(RatchetUpdate { generation: update.generation, step: UpdateStep::Acknowledge })
            },
            (UpdateStep::Propose(_) | UpdateStep::Respond(_), RotationPhase::Prepared { .. }) => {
                tracing::debug!(
                    %session_id,
                    generation = update.generation,
                    "duplicate ratchet update for prepared rotation"
                );
                None
            },
            (step, phase) => {
                tracing::warn!(
                    %session_id,
                    generation = update.generation,
                    current,
                    ?step,
                    ?phase,
                    "ratchet update out of place, dropping"
                );
                None
            },
        }
    }

    fn prepare<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        own: &EncryptionKeyPair,
        peer: &PublicEncryptionKey,
        sending_next: bool,
        session_id: SessionId,
    ) -> Option<()> {
        let shared = match provider.exchange(own, peer) {
            Ok(shared) => shared,
            Err(err) => {
                tracing::warn!(%session_id, error = %err, "rejecting ratchet key");
                self.asymmetric = None;
                self.rotation = RotationPhase::Idle;
                return None;
            },
        };

        let next = self.symmetric.current.derive_next(provider, shared.as_slice(), self.is_alice);
        self.symmetric.next = Some(next);
        self.asymmetric = None;
        self.rotation = RotationPhase::Prepared { sending_next };
        Some(())
    }
}

impl fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("is_alice", &self.is_alice)
            .field("generation", &self.generation)
            .field("incoming_message_id", &self.incoming_message_id)
            .field("outgoing_message_id", &self.outgoing_message_id)
            .field("rotation", &self.rotation)
            .field("sent_since_rotation", &self.sent_since_rotation)
            .field("update_queue", &self.update_queue)
            .finish_non_exhaustive()
    }
}
