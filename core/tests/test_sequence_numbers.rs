//! Property tests for sequence number comparison.
//!
//! Run with: cargo test --test test_sequence_numbers

use aodv_mesh_core::constants::{
    MAX_SEQUENCE_NUMBER, SEQUENCE_NUMBER_INTERVAL, UNKNOWN_SEQUENCE_NUMBER,
};
use aodv_mesh_core::routing::{is_at_least_as_fresh, is_better, max_sequence_number};
use proptest::prelude::*;

fn sequence_number() -> impl Strategy<Value = u32> {
    0..=MAX_SEQUENCE_NUMBER
}

fn hops() -> impl Strategy<Value = u32> {
    0u32..32
}

proptest! {
    #[test]
    fn prop_is_better_is_asymmetric(
        a in sequence_number(),
        b in sequence_number(),
        ha in hops(),
        hb in hops(),
    ) {
        prop_assert!(!(is_better(a, ha, b, hb) && is_better(b, hb, a, ha)));
    }

    #[test]
    fn prop_numeric_order_within_interval(
        base in 0..=(MAX_SEQUENCE_NUMBER - SEQUENCE_NUMBER_INTERVAL),
        offset in 1..=SEQUENCE_NUMBER_INTERVAL,
        ha in hops(),
        hb in hops(),
    ) {
        let newer = base + offset;
        prop_assert!(is_better(newer, ha, base, hb));
        prop_assert!(!is_better(base, hb, newer, ha));
    }

    #[test]
    fn prop_modular_order_beyond_interval(
        a in sequence_number(),
        b in sequence_number(),
        h in hops(),
    ) {
        let distance = (i64::from(a) - i64::from(b)).abs();
        prop_assume!(distance > i64::from(SEQUENCE_NUMBER_INTERVAL));
        let (a_mod, b_mod) = (a % SEQUENCE_NUMBER_INTERVAL, b % SEQUENCE_NUMBER_INTERVAL);
        prop_assume!(a_mod != b_mod);
        prop_assert_eq!(is_better(a, h, b, h), a_mod > b_mod);
    }

    #[test]
    fn prop_equal_numbers_prefer_fewer_hops(
        seq in sequence_number(),
        ha in hops(),
        hb in hops(),
    ) {
        prop_assert_eq!(is_better(seq, ha, seq, hb), ha < hb);
    }

    #[test]
    fn prop_max_is_commutative(a in sequence_number(), b in sequence_number()) {
        let max = max_sequence_number(a, b);
        prop_assert_eq!(max, max_sequence_number(b, a));
        prop_assert!(max == a || max == b);
        prop_assert!(is_at_least_as_fresh(max, a));
        prop_assert!(is_at_least_as_fresh(max, b));
    }

    #[test]
    fn prop_known_beats_unknown(
        seq in 1..=MAX_SEQUENCE_NUMBER,
        ha in hops(),
        hb in hops(),
    ) {
        prop_assert!(is_better(seq, ha, UNKNOWN_SEQUENCE_NUMBER, hb));
        prop_assert!(!is_better(UNKNOWN_SEQUENCE_NUMBER, hb, seq, ha));
        prop_assert_eq!(max_sequence_number(UNKNOWN_SEQUENCE_NUMBER, seq), seq);
    }

    #[test]
    fn prop_freshness_is_reflexive(seq in sequence_number()) {
        prop_assert!(is_at_least_as_fresh(seq, seq));
        prop_assert!(!is_better(seq, 1, seq, 1));
    }
}

#[test]
fn test_rollover_prefers_wrapped_number() {
    // A node that wrapped from the top back to 1 is newer than the old top.
    assert!(is_better(1, 3, MAX_SEQUENCE_NUMBER - 1, 3));
    assert!(!is_better(MAX_SEQUENCE_NUMBER - 1, 3, 1, 3));
    println!("✓ Sequence numbers survive wrap-around");
}
