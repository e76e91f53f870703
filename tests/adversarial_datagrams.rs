//! Property tests for hostile datagram input
//!
//! # Invariants
//!
//! - parse_datagram never panics and only accepts the two valid lengths
//! - ControlMessage::decode never panics and only yields volumes in [0, 1]
//! - Any delivery order of a complete sequence, with duplicates mixed in,
//!   reaches the jitter buffer exactly once per sequence and in order

use bytes::Bytes;
use proptest::prelude::*;

use lan_pcm_streamer::{
    audio::buffer::{create_shared_buffer, JitterThresholds},
    network::Ingest,
    protocol::{encode_sequenced, parse_datagram, ControlMessage, Datagram, SEQUENCE_HEADER_LEN},
};

const PAYLOAD: usize = 4;

/// A complete run 0..n plus some duplicates, in arbitrary order
fn shuffled_deliveries() -> impl Strategy<Value = (u32, Vec<u32>)> {
    (1u32..60)
        .prop_flat_map(|n| (Just(n), prop::collection::vec(0..n, 0..20)))
        .prop_flat_map(|(n, duplicates)| {
            let mut all: Vec<u32> = (0..n).collect();
            all.extend(duplicates);
            (Just(n), Just(all).prop_shuffle())
        })
}

proptest! {
    #[test]
    fn parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
        let len = data.len();
        match parse_datagram(Bytes::from(data), PAYLOAD) {
            Ok(Datagram::Sequenced { payload, .. }) => {
                prop_assert_eq!(len, PAYLOAD + SEQUENCE_HEADER_LEN);
                prop_assert_eq!(payload.len(), PAYLOAD);
            }
            Ok(Datagram::Legacy(payload)) => {
                prop_assert_eq!(len, PAYLOAD);
                prop_assert_eq!(payload.len(), PAYLOAD);
            }
            Err(_) => prop_assert!(len != PAYLOAD && len != PAYLOAD + SEQUENCE_HEADER_LEN),
        }
    }

    #[test]
    fn control_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..16)) {
        if let Ok(message) = ControlMessage::decode(&data) {
            prop_assert_eq!(data.len(), 8);
            prop_assert!((0.0..=1.0).contains(&message.volume));
        }
    }

    #[test]
    fn control_round_trip(volume in 0.0f64..=1.0) {
        let decoded = ControlMessage::decode(&ControlMessage::new(volume).encode()).unwrap();
        prop_assert_eq!(decoded.volume, volume);
    }

    #[test]
    fn shuffled_stream_is_delivered_in_order((n, deliveries) in shuffled_deliveries()) {
        let jitter = create_shared_buffer(JitterThresholds::default(), PAYLOAD).unwrap();
        let mut ingest = Ingest::new(jitter.clone(), 50);

        for seq in deliveries {
            ingest.handle_datagram(encode_sequenced(seq, &seq.to_le_bytes())).unwrap();
        }

        let delivered: Vec<u32> = std::iter::from_fn(|| jitter.dequeue())
            .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]]))
            .collect();
        prop_assert_eq!(delivered, (0..n).collect::<Vec<_>>());
        prop_assert!(!ingest.reorder().has_pending());
        prop_assert_eq!(ingest.reorder().next_expected(), n);
    }
}
