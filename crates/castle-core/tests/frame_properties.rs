//! Property tests for packet and frame decoding.
//!
//! Decoders see attacker-controlled bytes: they must reject garbage with an
//! error, never panic, and read back exactly what the encoders wrote.

use castle_core::{
    InstanceId,
    frame::{Content, Frame, Packet, PacketKind, RatchetHeader, assemble, encode_frame},
    ratchet::RatchetUpdate,
};
use castle_crypto::SeededProvider;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_decoders_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Packet::parse(&bytes);
        let _ = Frame::decode(&bytes);
        let _ = Content::decode(&bytes);
        let _ = RatchetUpdate::from_bytes(&bytes);
    }

    #[test]
    fn prop_ratchet_header_survives_parse(
        generation in any::<u32>(),
        message_id in any::<u32>(),
        sealed in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let header = RatchetHeader { generation, message_id };
        let packet = assemble(&header.to_bytes(), &sealed);

        let Ok(Packet::Ratchet { header: parsed, sealed: body }) = Packet::parse(&packet) else {
            panic!("expected ratchet packet");
        };
        prop_assert_eq!(parsed, header);
        prop_assert_eq!(body, sealed.as_slice());
        prop_assert_eq!(Packet::parse(&packet).map(|p| p.kind()), Ok(PacketKind::Ratchet));
    }

    #[test]
    fn prop_frame_fields_survive_decode(
        timestamp in any::<f64>().prop_filter("comparable", |t| !t.is_nan()),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        seed in any::<u64>(),
    ) {
        let provider = SeededProvider::new(seed);
        let instance = InstanceId::generate(&provider);
        let frame = encode_frame(&provider, timestamp, &instance, &[&payload]);

        let decoded = Frame::decode(&frame).unwrap();
        prop_assert_eq!(decoded.timestamp, timestamp);
        prop_assert_eq!(decoded.instance_id, instance);
        prop_assert_eq!(decoded.body.as_slice(), payload.as_slice());
    }
}
