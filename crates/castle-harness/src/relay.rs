//! In-memory transport and packet relays.
//!
//! Sessions never call each other directly. Each party gets an [`Endpoint`]
//! whose `send` only appends to an outbound wire; the test drives delivery
//! by moving wire packets through a [`Relay`] into the other session's
//! `receive`. Nothing is delivered from inside a session call, so a
//! `receive` can never re-enter the session that is flushing.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use castle_core::{DecryptedMessage, PeerId, Processed, Transport, TransportError, sync::AsyncList};
use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One party's side of the in-memory network.
#[derive(Default)]
pub struct Endpoint {
    wire: AsyncList<Vec<u8>>,
    processed: Mutex<Vec<(PeerId, Processed)>>,
    refuse_sends: AtomicUsize,
    connects: AtomicUsize,
    aborts: AtomicUsize,
}

impl Endpoint {
    /// Fresh endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every packet sent since the last call, in send order.
    pub fn take_wire(&self) -> Vec<Vec<u8>> {
        self.wire.take_all()
    }

    /// Packets sent and not yet taken.
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// Refuse the next `count` sends with a delivery error.
    pub fn refuse_next_sends(&self, count: usize) {
        self.refuse_sends.store(count, Ordering::SeqCst);
    }

    /// Everything the session reported, in order.
    pub fn processed(&self) -> Vec<(PeerId, Processed)> {
        lock(&self.processed).clone()
    }

    /// Delivered plaintext messages, in order.
    pub fn messages(&self) -> Vec<DecryptedMessage> {
        lock(&self.processed)
            .iter()
            .filter_map(|(_, message)| match message {
                Processed::Plaintext(message) => Some(message.clone()),
                Processed::Cyphertext(_) => None,
            })
            .collect()
    }

    /// Delivered plaintexts, in order.
    pub fn plaintexts(&self) -> Vec<Vec<u8>> {
        self.messages().into_iter().map(|message| message.plaintext.to_vec()).collect()
    }

    /// Times the session connected the transport.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Times the session aborted the transport.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Endpoint {
    async fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    async fn send(&self, packet: &[u8]) -> Result<(), TransportError> {
        let refused = self
            .refuse_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Delivery("endpoint refusing sends".into()));
        }
        self.wire.push(packet.to_vec());
        Ok(())
    }

    async fn process(&self, sender: &PeerId, message: Processed) {
        lock(&self.processed).push((sender.clone(), message));
    }
}

/// Policy applied to packets on their way from one endpoint to the other.
pub trait Relay: Send {
    /// Packets to deliver now for the batch just taken off the wire.
    fn route(&mut self, packets: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// Packets still held back. Called once the wires are quiet; must
    /// eventually return everything held so no packet is lost for good.
    fn release(&mut self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

/// Delivers every packet once, in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReliableRelay;

impl Relay for ReliableRelay {
    fn route(&mut self, packets: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        packets
    }
}

/// Fault rates of a [`ChaosRelay`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosConfig {
    /// Probability that a packet is delivered twice
    pub duplicate_rate: f64,
    /// Probability that a packet is held back until a later round
    pub delay_rate: f64,
    /// Shuffle each delivered batch
    pub reorder: bool,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self { duplicate_rate: 0.1, delay_rate: 0.1, reorder: true }
    }
}

/// Seeded relay that duplicates, delays and reorders packets. It never
/// drops one for good.
pub struct ChaosRelay {
    config: ChaosConfig,
    rng: ChaCha8Rng,
    held: Vec<Vec<u8>>,
}

impl ChaosRelay {
    /// Relay with `config` fault rates, reproducible from `seed`.
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        Self { config, rng: ChaCha8Rng::seed_from_u64(seed), held: Vec::new() }
    }

    /// Packets currently held back.
    pub fn held(&self) -> usize {
        self.held.len()
    }
}

impl Relay for ChaosRelay {
    fn route(&mut self, packets: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut batch = std::mem::take(&mut self.held);
        for packet in packets {
            if self.rng.gen_bool(self.config.delay_rate) {
                self.held.push(packet);
                continue;
            }
            if self.rng.gen_bool(self.config.duplicate_rate) {
                batch.push(packet.clone());
            }
            batch.push(packet);
        }
        if self.config.reorder {
            batch.shuffle(&mut self.rng);
        }
        batch
    }

    fn release(&mut self) -> Vec<Vec<u8>> {
        let mut held = std::mem::take(&mut self.held);
        if self.config.reorder {
            held.shuffle(&mut self.rng);
        }
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoint_records_sends_in_order() {
        let endpoint = Endpoint::new();
        endpoint.send(&[1]).await.unwrap();
        endpoint.send(&[2]).await.unwrap();

        assert_eq!(endpoint.take_wire(), vec![vec![1], vec![2]]);
        assert_eq!(endpoint.wire_len(), 0);
    }

    #[tokio::test]
    async fn refused_sends_do_not_reach_the_wire() {
        let endpoint = Endpoint::new();
        endpoint.refuse_next_sends(1);

        assert!(endpoint.send(&[1]).await.is_err());
        endpoint.send(&[2]).await.unwrap();
        assert_eq!(endpoint.take_wire(), vec![vec![2]]);
    }

    #[test]
    fn chaos_relay_never_loses_packets() {
        let mut relay = ChaosRelay::new(
            ChaosConfig { duplicate_rate: 0.3, delay_rate: 0.5, reorder: true },
            7,
        );
        let packets: Vec<Vec<u8>> = (0u8..50).map(|i| vec![i]).collect();

        let mut delivered = relay.route(packets.clone());
        delivered.extend(relay.route(Vec::new()));
        delivered.extend(relay.release());
        delivered.sort();
        delivered.dedup();

        assert_eq!(delivered, packets);
        assert_eq!(relay.held(), 0);
    }

    #[test]
    fn chaos_relay_is_reproducible() {
        let packets: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i]).collect();
        let mut first = ChaosRelay::new(ChaosConfig::default(), 11);
        let mut second = ChaosRelay::new(ChaosConfig::default(), 11);

        assert_eq!(first.route(packets.clone()), second.route(packets));
    }
}
