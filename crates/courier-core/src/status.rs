//! Delivery state machine.
//!
//! ```text
//! Pending ──► Delivered ──► Sent ──► Read
//!    │
//!    └──► Dropped   (recipient blocked the sender; absorbing)
//! ```
//!
//! Transitions are driven by recipient acks. Each ack names the status it
//! moves to, and is accepted only from the immediately preceding status.
//! Re-applying the current status is a no-op, anything else is inconsistent
//! and is dropped without retry.

use serde::{Deserialize, Serialize};

/// True delivery status of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Persisted, not yet acknowledged by the recipient device
    Pending,
    /// Recipient device received it
    Delivered,
    /// Recipient app processed it
    Sent,
    /// Recipient opened the conversation
    Read,
    /// Suppressed because the recipient blocked the sender
    Dropped,
}

impl DeliveryStatus {
    /// Position on the delivery chain. `Dropped` sits beside the chain and
    /// has no position.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Delivered => Some(1),
            Self::Sent => Some(2),
            Self::Read => Some(3),
            Self::Dropped => None,
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Dropped)
    }

    /// Status the sender is shown. A drop is reported as `Sent` so the
    /// sender cannot learn about the block.
    pub fn reported(self) -> ReportedStatus {
        match self {
            Self::Pending => ReportedStatus::Pending,
            Self::Delivered => ReportedStatus::Delivered,
            Self::Sent | Self::Dropped => ReportedStatus::Sent,
            Self::Read => ReportedStatus::Read,
        }
    }

    /// Move to `Dropped`, allowed only while pending.
    pub fn drop_blocked(self) -> Transition {
        match self {
            Self::Pending => Transition::Advance(Self::Dropped),
            Self::Dropped => Transition::AlreadyApplied,
            current => Transition::Inconsistent { current, requested: Self::Dropped },
        }
    }

    /// Apply a recipient ack.
    pub fn apply(self, ack: AckKind) -> Transition {
        let requested = ack.target();
        match (self, ack) {
            (Self::Pending, AckKind::Delivered)
            | (Self::Delivered, AckKind::Sent)
            | (Self::Sent, AckKind::Read) => Transition::Advance(requested),
            (current, _) if current == requested => Transition::AlreadyApplied,
            (current, _) => Transition::Inconsistent { current, requested },
        }
    }
}

/// Status values exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportedStatus {
    /// Not yet delivered
    Pending,
    /// Delivered to the device
    Delivered,
    /// Processed by the app (also shown for suppressed messages)
    Sent,
    /// Read
    Read,
}

/// Acknowledgment sent by a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckKind {
    /// Device received the push
    Delivered,
    /// App processed the message
    Sent,
    /// User opened the conversation
    Read,
}

impl AckKind {
    /// Status the ack moves a record to.
    pub fn target(self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Delivered,
            Self::Sent => DeliveryStatus::Sent,
            Self::Read => DeliveryStatus::Read,
        }
    }
}

/// Result of evaluating a transition against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the contained status
    Advance(DeliveryStatus),
    /// Already in the requested status; nothing to do
    AlreadyApplied,
    /// Requested status cannot follow the current one
    Inconsistent {
        /// Status at evaluation time
        current: DeliveryStatus,
        /// Status the event asked for
        requested: DeliveryStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut status = DeliveryStatus::Pending;
        for ack in [AckKind::Delivered, AckKind::Sent, AckKind::Read] {
            let Transition::Advance(next) = status.apply(ack) else {
                panic!("{ack:?} should advance from {status:?}");
            };
            status = next;
        }
        assert_eq!(status, DeliveryStatus::Read);
        assert!(status.is_terminal());
    }

    #[test]
    fn skipping_a_step_is_inconsistent() {
        assert_eq!(
            DeliveryStatus::Pending.apply(AckKind::Read),
            Transition::Inconsistent {
                current: DeliveryStatus::Pending,
                requested: DeliveryStatus::Read
            }
        );
    }

    #[test]
    fn regression_is_inconsistent() {
        assert!(matches!(
            DeliveryStatus::Read.apply(AckKind::Delivered),
            Transition::Inconsistent { .. }
        ));
    }

    #[test]
    fn repeat_is_already_applied() {
        assert_eq!(DeliveryStatus::Sent.apply(AckKind::Sent), Transition::AlreadyApplied);
    }

    #[test]
    fn dropped_is_absorbing_and_reported_as_sent() {
        for ack in [AckKind::Delivered, AckKind::Sent, AckKind::Read] {
            assert!(matches!(DeliveryStatus::Dropped.apply(ack), Transition::Inconsistent { .. }));
        }
        assert_eq!(DeliveryStatus::Dropped.reported(), ReportedStatus::Sent);
        assert!(matches!(DeliveryStatus::Delivered.drop_blocked(), Transition::Inconsistent { .. }));
    }
}
