//! Property-based tests for packet framing, sequencing and quality tiers.

use proptest::prelude::*;
use serde_json::Value;
use telelink::codec::{self, DecodeError, PacketCodec, Record, HEADER_LEN};
use telelink::protocol::Registration;
use telelink::quality::{compute_score, QualityTier, QualityWeights};

// ─── Strategies ─────────────────────────────────────────────────────────────

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        any::<f64>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn record() -> impl Strategy<Value = Record> {
    prop::collection::btree_map("[a-z_]{1,12}", value(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn registration() -> impl Strategy<Value = Option<Registration>> {
    prop_oneof![
        Just(None),
        (0i64..=5).prop_map(Registration::from_code),
    ]
}

// ─── Codec ──────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn decode_inverts_encode(rec in record()) {
        let codec = PacketCodec::new();
        let packet = codec.encode(&rec).unwrap();
        let decoded = codec::decode(packet.as_bytes()).unwrap();
        prop_assert_eq!(decoded.sequence, packet.sequence());
        prop_assert_eq!(decoded.digest, packet.digest());
        prop_assert_eq!(decoded.record, rec);
    }

    #[test]
    fn encoding_is_deterministic(rec in record()) {
        let a = PacketCodec::starting_at(7).encode(&rec).unwrap();
        let b = PacketCodec::starting_at(7).encode(&rec).unwrap();
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn payload_corruption_is_detected(rec in record(), pos in any::<prop::sample::Index>(), flip in 1u8..=255) {
        let packet = PacketCodec::new().encode(&rec).unwrap();
        let mut bytes = packet.as_bytes().to_vec();
        let i = HEADER_LEN + pos.index(bytes.len() - HEADER_LEN);
        bytes[i] ^= flip;
        let is_mismatch = matches!(codec::decode(&bytes), Err(DecodeError::DigestMismatch { .. }));
        prop_assert!(is_mismatch);
    }

    #[test]
    fn sequences_strictly_increase(recs in prop::collection::vec(record(), 1..40), start in 0u32..1_000_000) {
        let codec = PacketCodec::starting_at(start);
        let mut last = None;
        for rec in &recs {
            let seq = codec.encode(rec).unwrap().sequence();
            if let Some(prev) = last {
                prop_assert!(seq > prev);
            }
            last = Some(seq);
        }
        prop_assert_eq!(codec.peek_sequence(), start + recs.len() as u32);
    }

    // ─── Quality ────────────────────────────────────────────────────────

    #[test]
    fn tier_mapping_is_monotonic(a in 0u8..=100, b in 0u8..=100) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(QualityTier::from_score(lo) <= QualityTier::from_score(hi));
    }

    #[test]
    fn tier_matches_thresholds(q in 0u8..=100) {
        let expected = match q {
            80..=100 => QualityTier::Excellent,
            60..=79 => QualityTier::Good,
            40..=59 => QualityTier::Fair,
            _ => QualityTier::Poor,
        };
        prop_assert_eq!(QualityTier::from_score(q), expected);
    }

    #[test]
    fn score_stays_in_range(
        level in prop_oneof![0u8..=31, Just(99u8)],
        reg in registration(),
        attached in prop::option::of(any::<bool>()),
        rate in prop::option::of(0.0f64..=100.0),
    ) {
        let score = compute_score(&QualityWeights::default(), level, reg, attached, rate);
        prop_assert!(score <= 100);
    }

    #[test]
    fn better_signal_never_lowers_score(
        a in 0u8..=31,
        b in 0u8..=31,
        attached in prop::option::of(any::<bool>()),
        rate in prop::option::of(0.0f64..=100.0),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let w = QualityWeights::default();
        prop_assert!(compute_score(&w, lo, None, attached, rate) <= compute_score(&w, hi, None, attached, rate));
    }
}
