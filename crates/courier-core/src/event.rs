//! Events carried by the durable broker.
//!
//! The broker delivers at least once and possibly out of order, so every
//! event is a trigger to re-check stored state, never a command to apply
//! blindly.

use serde::{Deserialize, Serialize};

use crate::message::{MessageId, UserId};

/// Which part of a media attachment a purge targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaPart {
    /// Encrypted blob in object storage
    Blob,
    /// Derived thumbnail in object storage
    Thumbnail,
    /// Distribution cache entry for the blob
    CacheEntry,
}

/// Broker event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedeliveryEvent {
    /// Timed retry `attempt` after a failed push
    TimedRetry {
        /// Message to retry
        message_id: MessageId,
        /// Recipient to retry
        recipient: UserId,
        /// 1-based retry number
        attempt: u32,
    },
    /// Direct message queued for an offline recipient
    OfflineDelivery {
        /// Queued message
        message_id: MessageId,
        /// Offline recipient
        recipient: UserId,
    },
    /// Group message queued for an offline member
    GroupNotification {
        /// Queued message
        message_id: MessageId,
        /// Offline member
        recipient: UserId,
    },
    /// User came online
    PresenceOnline {
        /// User whose presence changed
        user: UserId,
    },
    /// Retry of one failed media sub-delete
    MediaPurge {
        /// Object or cache key
        key: String,
        /// Which store the key lives in
        part: MediaPart,
    },
    /// TTL deadline for a message
    Expire {
        /// Message to expire
        message_id: MessageId,
    },
}

/// Event class, for consumers that subscribe per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventClass {
    /// Timed retries
    TimedRetry,
    /// Offline direct delivery
    OfflineDelivery,
    /// Offline group notification
    GroupNotification,
    /// Presence changes
    Presence,
    /// Media purges and TTL expiry
    Cleanup,
}

/// Dispatch priority when several events are due at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Timers, notifications and cleanup
    Normal,
    /// Presence changes jump ahead of timed retries
    High,
}

impl RedeliveryEvent {
    /// Class of this event.
    pub fn class(&self) -> EventClass {
        match self {
            Self::TimedRetry { .. } => EventClass::TimedRetry,
            Self::OfflineDelivery { .. } => EventClass::OfflineDelivery,
            Self::GroupNotification { .. } => EventClass::GroupNotification,
            Self::PresenceOnline { .. } => EventClass::Presence,
            Self::MediaPurge { .. } | Self::Expire { .. } => EventClass::Cleanup,
        }
    }

    /// Dispatch priority.
    pub fn priority(&self) -> Priority {
        match self.class() {
            EventClass::Presence => Priority::High,
            _ => Priority::Normal,
        }
    }
}
