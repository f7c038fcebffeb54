//! Fuzz target for the delivery status machine
//!
//! Applies arbitrary ack and block sequences to one record.
//!
//! # Invariants
//!
//! - Status never moves backwards along the delivery chain
//! - Terminal statuses never change
//! - Dropped is only reachable from Pending
//! - The reported status of a dropped record is indistinguishable from Sent
//! - Re-applying the current status is always a no-op

#![no_main]

use arbitrary::Arbitrary;
use courier_core::{AckKind, DeliveryStatus, ReportedStatus, Transition};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Event {
    Delivered,
    Sent,
    Read,
    Block,
}

fuzz_target!(|events: Vec<Event>| {
    let mut status = DeliveryStatus::Pending;

    for event in events {
        let transition = match event {
            Event::Delivered => status.apply(AckKind::Delivered),
            Event::Sent => status.apply(AckKind::Sent),
            Event::Read => status.apply(AckKind::Read),
            Event::Block => status.drop_blocked(),
        };

        match transition {
            Transition::Advance(next) => {
                assert!(!status.is_terminal(), "{status:?} is terminal but moved to {next:?}");
                match next.rank() {
                    Some(rank) => assert_eq!(Some(rank), status.rank().map(|r| r + 1)),
                    None => assert_eq!(status, DeliveryStatus::Pending),
                }
                status = next;
            },
            Transition::AlreadyApplied => {},
            Transition::Inconsistent { current, requested } => {
                assert_eq!(current, status);
                assert_ne!(requested, status);
            },
        }

        if status == DeliveryStatus::Dropped {
            assert_eq!(status.reported(), ReportedStatus::Sent);
        }
    }

    for ack in [AckKind::Delivered, AckKind::Sent, AckKind::Read] {
        if ack.target() == status {
            assert_eq!(status.apply(ack), Transition::AlreadyApplied);
        }
    }
});
