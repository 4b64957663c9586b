//! Ratchet state machine.
//!
//! Pure state transitions with no I/O: the session feeds in packets and
//! caller plaintexts, and gets back sealed packets to enqueue and plaintexts
//! to deliver. Persisting the [`RatchetRecord`] after every call is the
//! session's job.
//!
//! # Rotation
//!
//! ```text
//! A (initiator)                          B (responder)
//! Propose{g+1, pk_A}   ──── gen g ────►  generate pk_B, derive next
//!                      ◄─── gen g ─────  Respond{g+1, pk_B}
//! derive next
//! Acknowledge{g+1}     ──── gen g+1 ──►  promote next → current
//!                      ◄─── gen g+1 ───  Acknowledge{g+1}
//! promote next → current
//! ```
//!
//! `next = HKDF(X25519(own, peer), salt = current keys)`. The exchange
//! private keys are dropped as soon as `next` is derived, and the keys of
//! generation `g` are dropped on promotion.

mod buffer;
mod state;
mod update;

pub use buffer::{Arrival, IncomingBuffer};
use castle_crypto::{PrimitiveProvider, Zeroizing};
use serde::{Deserialize, Serialize};
pub use state::{
    FIRST_MESSAGE_ID, Promotion, RatchetSnapshot, RatchetState, RotationPhase, SymmetricKeys,
    WRAP_MARGIN,
};
pub use update::{RatchetUpdate, UpdateStep};

use crate::{
    config::SessionConfig,
    error::SessionError,
    frame::{Content, Frame, Packet, RatchetHeader, encode_frame},
    ids::{InstanceId, SessionId},
    instances::{InstanceTracker, InstanceVerdict},
};

/// Plaintext accepted in order and ready for the caller.
#[derive(Debug)]
pub struct Delivery {
    /// Raw authenticated packet
    pub packet: Vec<u8>,
    /// Caller plaintext
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Sender's timestamp
    pub timestamp: f64,
    /// Sender's session instance
    pub instance_id: InstanceId,
}

/// Output of feeding one packet to the ratchet, in the order produced.
#[derive(Debug)]
pub enum Event {
    /// Hand plaintext to the caller
    Deliver(Delivery),
    /// Enqueue a sealed control packet
    Send(Vec<u8>),
}

/// Everything persisted for one ratchet session, stored as one record so
/// the watermark and the buffer above it never disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetRecord {
    /// Keys, message ids and rotation progress
    pub state: RatchetState,
    /// Authenticated arrivals above the watermark
    pub buffer: IncomingBuffer,
    /// Live and retired peer instances
    pub instances: InstanceTracker,
}

impl RatchetRecord {
    /// Fresh record at generation 0.
    pub fn new(secret: &[u8], is_alice: bool) -> Self {
        Self {
            state: RatchetState::new(secret, is_alice),
            buffer: IncomingBuffer::new(),
            instances: InstanceTracker::new(),
        }
    }

    /// Inspection view.
    pub fn snapshot(&self) -> RatchetSnapshot {
        self.state.snapshot(self.buffer.len())
    }

    /// Seal caller plaintext, opening a rotation first when the threshold
    /// is reached. Returns the packets to enqueue in order.
    pub fn seal_data<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        plaintext: &[u8],
        timestamp: f64,
        instance_id: &InstanceId,
        config: &SessionConfig,
        session_id: SessionId,
    ) -> Result<Vec<Vec<u8>>, SessionError> {
        if self.state.remaining_message_ids() < 2 {
            return Err(SessionError::Overflow);
        }

        let mut packets = Vec::with_capacity(2);
        if self.state.should_rotate(config.effective_rotation_threshold()) {
            let proposal = self.state.propose(provider);
            tracing::info!(
                %session_id,
                generation = proposal.generation,
                "proposing ratchet rotation"
            );
            packets.push(self.seal_update(provider, &proposal, timestamp, instance_id)?);
        }

        let frame =
            encode_frame(provider, timestamp, instance_id, &[&Content::DATA_PREFIX, plaintext]);
        packets.push(self.state.seal(provider, &frame)?);
        Ok(packets)
    }

    fn seal_update<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        update: &RatchetUpdate,
        timestamp: f64,
        instance_id: &InstanceId,
    ) -> Result<Vec<u8>, SessionError> {
        let body = Content::update_body(update);
        let frame = encode_frame(provider, timestamp, instance_id, &[&body]);
        self.state.seal(provider, &frame)
    }

    /// Feed one received ratchet packet.
    ///
    /// Replays and packets beyond the reorder window are dropped with a log
    /// line. A packet ahead of the watermark is authenticated, then held.
    /// The next expected packet is processed and releases any held packets
    /// that follow it.
    ///
    /// Errors (authentication, unknown generation) concern this packet only
    /// and leave the record unchanged.
    pub fn receive<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        packet: &[u8],
        instance_id: &InstanceId,
        config: &SessionConfig,
        session_id: SessionId,
    ) -> Result<Vec<Event>, SessionError> {
        let (header, sealed) = match Packet::parse(packet)? {
            Packet::Ratchet { header, sealed } => (header, sealed),
            other => return Err(SessionError::UnexpectedPacket { kind: other.kind().to_byte() }),
        };
        let watermark = self.state.incoming_message_id();

        match Arrival::classify(watermark, header.message_id, config.reorder_window) {
            Arrival::Replay => {
                tracing::debug!(
                    %session_id,
                    message_id = header.message_id,
                    watermark,
                    "dropping replayed packet"
                );
                Ok(Vec::new())
            },
            Arrival::Overflow => {
                tracing::warn!(
                    %session_id,
                    message_id = header.message_id,
                    watermark,
                    window = config.reorder_window,
                    "packet beyond reorder window, dropping"
                );
                Ok(Vec::new())
            },
            Arrival::Ahead => {
                self.state.open(provider, &header, sealed)?;
                if !self.buffer.insert(header.message_id, packet.to_vec()) {
                    tracing::debug!(
                        %session_id,
                        message_id = header.message_id,
                        "dropping duplicate buffered packet"
                    );
                }
                Ok(Vec::new())
            },
            Arrival::Next => {
                let frame = self.state.open(provider, &header, sealed)?;
                let mut events = Vec::new();
                self.accept(
                    provider,
                    &header,
                    packet,
                    &frame,
                    instance_id,
                    config,
                    session_id,
                    &mut events,
                )?;
                self.drain(provider, instance_id, config, session_id, &mut events)?;
                Ok(events)
            },
        }
    }

    fn drain<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        instance_id: &InstanceId,
        config: &SessionConfig,
        session_id: SessionId,
        events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        while let Some(next_id) = self.state.incoming_message_id().checked_add(1) {
            let Some(packet) = self.buffer.take(next_id) else { break };
            let Ok(Packet::Ratchet { header, sealed }) = Packet::parse(&packet) else {
                break;
            };

            match self.state.open(provider, &header, sealed) {
                Ok(frame) => {
                    self.accept(
                        provider,
                        &header,
                        &packet,
                        &frame,
                        instance_id,
                        config,
                        session_id,
                        events,
                    )?;
                },
                Err(err) => {
                    tracing::warn!(
                        %session_id,
                        message_id = header.message_id,
                        error = %err,
                        "buffered packet no longer opens, dropping"
                    );
                    break;
                },
            }
        }
        self.buffer.prune(self.state.incoming_message_id());
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn accept<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        header: &RatchetHeader,
        packet: &[u8],
        frame: &[u8],
        instance_id: &InstanceId,
        config: &SessionConfig,
        session_id: SessionId,
        events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        let mut replies = Vec::new();
        if let Some(promotion) = self.state.accept(header) {
            tracing::info!(%session_id, generation = promotion.generation, "ratchet promoted");
            if promotion.confirm {
                replies.push(RatchetUpdate {
                    generation: promotion.generation,
                    step: UpdateStep::Acknowledge,
                });
            }
        }

        let frame = match Frame::decode(frame) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(
                    %session_id,
                    message_id = header.message_id,
                    error = %err,
                    "dropping frame"
                );
                return self.seal_replies(provider, &replies, 0.0, instance_id, events);
            },
        };

        match self.instances.observe(frame.instance_id, config.max_stale_instances) {
            InstanceVerdict::Live => {},
            InstanceVerdict::Replaced { previous } => {
                tracing::info!(
                    %session_id,
                    instance = %frame.instance_id,
                    %previous,
                    "peer instance replaced"
                );
            },
            InstanceVerdict::Stale => {
                tracing::warn!(
                    %session_id,
                    instance = %frame.instance_id,
                    message_id = header.message_id,
                    "discarding frame from stale peer instance"
                );
                return self.seal_replies(provider, &replies, frame.timestamp, instance_id, events);
            },
        }

        let handled = match Content::decode(&frame.body) {
            Ok(Content::Data(plaintext)) => {
                events.push(Event::Deliver(Delivery {
                    packet: packet.to_vec(),
                    plaintext,
                    timestamp: frame.timestamp,
                    instance_id: frame.instance_id,
                }));
                self.state.pump_updates(provider, session_id)
            },
            Ok(Content::Update(update)) => {
                self.state.handle_update(provider, update, config.max_deferred_updates, session_id)
            },
            Err(err) => {
                tracing::warn!(
                    %session_id,
                    message_id = header.message_id,
                    error = %err,
                    "malformed ratchet content, dropping"
                );
                Vec::new()
            },
        };

        replies.extend(handled);
        self.seal_replies(provider, &replies, frame.timestamp, instance_id, events)
    }

    /// Control frames carry the timestamp of the frame that caused them.
    fn seal_replies<P: PrimitiveProvider>(
        &mut self,
        provider: &P,
        replies: &[RatchetUpdate],
        timestamp: f64,
        instance_id: &InstanceId,
        events: &mut Vec<Event>,
    ) -> Result<(), SessionError> {
        for reply in replies {
            events.push(Event::Send(self.seal_update(provider, reply, timestamp, instance_id)?));
        }
        Ok(())
    }
}
