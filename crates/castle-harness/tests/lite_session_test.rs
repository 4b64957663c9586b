//! Lite sessions: one static key, arrival-order delivery.

use castle_core::{Processed, SessionConfig, SessionError, SessionVariant};
use castle_harness::SessionPair;

async fn established(seed: u64) -> SessionPair {
    let mut pair = SessionPair::open(SessionConfig::lite(), seed).await.unwrap();
    pair.pump().await;
    pair
}

#[tokio::test]
async fn hello_arrives_with_timestamp_and_instance() {
    let mut pair = established(1).await;
    assert_eq!(pair.alice.session.variant(), SessionVariant::Lite);

    pair.alice_sends(b"hello", 1_700_000_000_000.0).await.unwrap();

    let messages = pair.bob.endpoint.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].plaintext.as_slice(), b"hello");
    assert_eq!(messages[0].timestamp, 1_700_000_000_000.0);
    assert_eq!(messages[0].instance_id, pair.alice.session.instance_id());
}

#[tokio::test]
async fn raw_packet_is_reported_before_plaintext() {
    let mut pair = established(2).await;
    pair.alice_sends(b"hello", 1.0).await.unwrap();

    let processed: Vec<_> = pair.bob.endpoint.processed().into_iter().map(|(_, p)| p).collect();
    let [Processed::Cyphertext(packet), Processed::Plaintext(message)] = processed.as_slice() else {
        panic!("expected cyphertext then plaintext, got {processed:?}");
    };
    assert_eq!(packet[0], 0x02);
    assert_eq!(message.plaintext.as_slice(), b"hello");
}

#[tokio::test]
async fn tampered_packet_fails_authentication() {
    let pair = established(3).await;
    pair.alice.session.send(b"hello", 1.0).await.unwrap();
    let genuine = pair.alice.endpoint.take_wire().remove(0);

    for index in [1, genuine.len() / 2, genuine.len() - 1] {
        let mut tampered = genuine.clone();
        tampered[index] ^= 0x01;
        assert_eq!(pair.bob.session.receive(&tampered).await, Err(SessionError::Authentication));
    }
    assert!(pair.bob.received().is_empty());

    pair.bob.session.receive(&genuine).await.unwrap();
    assert_eq!(pair.bob.received(), vec![b"hello".to_vec()]);
}

#[tokio::test]
async fn both_directions_round_trip() {
    let mut pair = established(4).await;

    for i in 0..10u8 {
        pair.alice_sends(&[b'a', i], f64::from(i)).await.unwrap();
        pair.bob_sends(&[b'b', i], f64::from(i)).await.unwrap();
    }

    let from_alice: Vec<Vec<u8>> = (0..10u8).map(|i| vec![b'a', i]).collect();
    let from_bob: Vec<Vec<u8>> = (0..10u8).map(|i| vec![b'b', i]).collect();
    assert_eq!(pair.bob.received(), from_alice);
    assert_eq!(pair.alice.received(), from_bob);
    assert!(pair.alice.session.ratchet_snapshot().await.is_none());
}

#[tokio::test]
async fn ratchet_packet_is_unexpected() {
    let pair = established(5).await;
    let packet = [0x03, 0, 0, 0, 0, 0, 0, 0, 1, 0xAA, 0xBB];

    assert_eq!(
        pair.bob.session.receive(&packet).await,
        Err(SessionError::UnexpectedPacket { kind: 0x03 })
    );
}

#[tokio::test]
async fn frames_from_replaced_instance_are_discarded() {
    let mut pair = established(6).await;
    pair.alice_sends(b"first", 1.0).await.unwrap();

    // Captured from the old construction, delivered late
    pair.alice.session.send(b"late", 2.0).await.unwrap();
    let late = pair.alice.endpoint.take_wire();

    let old_instance = pair.alice.session.instance_id();
    pair.reopen_alice().await.unwrap();
    assert_ne!(pair.alice.session.instance_id(), old_instance);

    pair.alice_sends(b"second", 3.0).await.unwrap();
    for packet in &late {
        pair.bob.session.receive(packet).await.unwrap();
    }

    assert_eq!(pair.bob.received(), vec![b"first".to_vec(), b"second".to_vec()]);
}

#[tokio::test]
async fn aborted_session_refuses_traffic() {
    let mut pair = established(7).await;
    pair.alice.session.abort().await;

    assert_eq!(pair.alice.session.send(b"x", 1.0).await, Err(SessionError::Aborted));
    assert_eq!(pair.alice.session.receive(&[0x02, 1, 2, 3]).await, Err(SessionError::Aborted));
    assert_eq!(pair.alice.endpoint.aborts(), 1);

    pair.bob_sends(b"anyone there", 2.0).await.unwrap();
    assert_eq!(pair.alice.receive_errors, vec![SessionError::Aborted]);
}
