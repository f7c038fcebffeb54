//! Message rows and per-recipient delivery records.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::status::DeliveryStatus;

/// User identifier.
pub type UserId = u64;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `self + duration`, saturating at the far future.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Globally unique message id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u128);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// A conversation owns exactly one cryptographic context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConversationId {
    /// Two participants, lower id first
    Direct(UserId, UserId),
    /// Group with an externally assigned id
    Group(u128),
}

impl ConversationId {
    /// Deterministic id for a pair; argument order does not matter.
    pub fn direct(a: UserId, b: UserId) -> Self {
        Self::Direct(a.min(b), a.max(b))
    }

    /// Group conversation id.
    pub fn group(group_id: u128) -> Self {
        Self::Group(group_id)
    }

    /// True for group conversations.
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(a, b) => write!(f, "direct:{a}:{b}"),
            Self::Group(id) => write!(f, "group:{id:032x}"),
        }
    }
}

/// Encrypted media attached to a message. Blobs are encrypted client-side
/// before upload; the server only ever deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Object-store key of the encrypted blob, also its cache key
    pub blob_key: String,
    /// Object-store key of the derived thumbnail
    pub thumbnail_key: Option<String>,
}

/// A persisted message row.
///
/// The body is sealed once under a per-message content key; each recipient
/// gets that key wrapped by the conversation's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: MessageId,
    /// Conversation the message belongs to
    pub conversation: ConversationId,
    /// Sending user
    pub sender: UserId,
    /// Users the message is addressed to
    pub recipients: Vec<UserId>,
    /// Monotonic per conversation
    pub sequence: u64,
    /// Sealed body (nonce followed by ciphertext)
    pub body: Vec<u8>,
    /// Encoded session output wrapping the content key, per recipient
    pub wrapped_keys: BTreeMap<UserId, Vec<u8>>,
    /// Creation time
    pub created_at: Timestamp,
    /// Deleted at `created_at + ttl` whatever its status
    pub ttl: Duration,
    /// Attached media, if any
    pub media: Option<MediaRef>,
}

impl Message {
    /// Point after which the row is deleted regardless of status.
    pub fn expires_at(&self) -> Timestamp {
        self.created_at.saturating_add(self.ttl)
    }

    /// True once `now` has reached the expiry point.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at()
    }
}

/// How a pending record will be revived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RedeliveryMode {
    /// Nothing scheduled: pushed and awaiting an ack, or terminal
    Idle,
    /// A timed retry is scheduled
    Timed,
    /// Waiting for the recipient to come online
    AwaitPresence,
}

/// Delivery state of one message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Message the record belongs to
    pub message_id: MessageId,
    /// Recipient the record tracks
    pub recipient: UserId,
    /// Current status
    pub status: DeliveryStatus,
    /// Timed retries scheduled so far
    pub attempts: u32,
    /// Redelivery trigger while pending
    pub mode: RedeliveryMode,
    /// Last change
    pub updated_at: Timestamp,
}

impl DeliveryRecord {
    /// Fresh pending record.
    pub fn pending(message_id: MessageId, recipient: UserId, now: Timestamp) -> Self {
        Self {
            message_id,
            recipient,
            status: DeliveryStatus::Pending,
            attempts: 0,
            mode: RedeliveryMode::Idle,
            updated_at: now,
        }
    }

    /// Copy with a new status; redelivery stops once past pending.
    #[must_use]
    pub fn with_status(&self, status: DeliveryStatus, now: Timestamp) -> Self {
        let mode = if status == DeliveryStatus::Pending { self.mode } else { RedeliveryMode::Idle };
        Self { status, mode, updated_at: now, ..self.clone() }
    }

    /// Copy with a new redelivery mode and attempt count.
    #[must_use]
    pub fn with_mode(&self, mode: RedeliveryMode, attempts: u32, now: Timestamp) -> Self {
        Self { mode, attempts, updated_at: now, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_id_ignores_argument_order() {
        assert_eq!(ConversationId::direct(9, 2), ConversationId::direct(2, 9));
        assert_ne!(ConversationId::direct(1, 2), ConversationId::direct(1, 3));
    }

    #[test]
    fn expiry_saturates() {
        let message = Message {
            id: MessageId(1),
            conversation: ConversationId::direct(1, 2),
            sender: 1,
            recipients: vec![2],
            sequence: 0,
            body: Vec::new(),
            wrapped_keys: BTreeMap::new(),
            created_at: Timestamp::from_millis(u64::MAX - 5),
            ttl: Duration::from_secs(60),
            media: None,
        };
        assert_eq!(message.expires_at(), Timestamp::from_millis(u64::MAX));
        assert!(!message.is_expired(Timestamp::from_millis(u64::MAX - 1)));
    }

    #[test]
    fn leaving_pending_clears_redelivery() {
        let record = DeliveryRecord::pending(MessageId(1), 2, Timestamp::default()).with_mode(
            RedeliveryMode::Timed,
            2,
            Timestamp::from_millis(10),
        );
        let delivered = record.with_status(DeliveryStatus::Delivered, Timestamp::from_millis(20));

        assert_eq!(delivered.mode, RedeliveryMode::Idle);
        assert_eq!(delivered.attempts, 2);
    }

    #[test]
    fn message_id_displays_as_hex() {
        assert_eq!(MessageId(0xAB).to_string(), format!("{:0>32}", "ab"));
    }
}
