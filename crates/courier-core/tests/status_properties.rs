//! Property-based tests for the delivery state machine
//!
//! 1. **Monotonic**: status never moves backwards along the chain
//! 2. **Idempotent**: applying an ack twice equals applying it once
//! 3. **Absorbing drop**: nothing leaves `Dropped`

use courier_core::{AckKind, DeliveryStatus, Transition};
use proptest::prelude::*;

fn ack() -> impl Strategy<Value = AckKind> {
    prop_oneof![Just(AckKind::Delivered), Just(AckKind::Sent), Just(AckKind::Read)]
}

fn step(status: DeliveryStatus, ack: AckKind) -> DeliveryStatus {
    match status.apply(ack) {
        Transition::Advance(next) => next,
        Transition::AlreadyApplied | Transition::Inconsistent { .. } => status,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: any ack sequence leaves the rank non-decreasing
    #[test]
    fn prop_status_is_monotonic(acks in prop::collection::vec(ack(), 0..40)) {
        let mut status = DeliveryStatus::Pending;
        for ack in acks {
            let next = step(status, ack);
            prop_assert!(next.rank() >= status.rank());
            status = next;
        }
    }

    /// Property: applying the same ack twice yields the same state as once
    #[test]
    fn prop_ack_is_idempotent(
        prefix in prop::collection::vec(ack(), 0..10),
        ack in ack(),
    ) {
        let start = prefix.into_iter().fold(DeliveryStatus::Pending, step);
        let once = step(start, ack);
        prop_assert_eq!(step(once, ack), once);
    }

    /// Property: a dropped record never reaches delivered, sent or read
    #[test]
    fn prop_dropped_is_absorbing(acks in prop::collection::vec(ack(), 0..20)) {
        let end = acks.into_iter().fold(DeliveryStatus::Dropped, step);
        prop_assert_eq!(end, DeliveryStatus::Dropped);
    }
}
