//! Durable message store.
//!
//! Message rows are keyed by id. Delivery records are keyed by
//! (message id, recipient) and indexed by (recipient, status) so a presence
//! change can find everything still pending for a user. The trait is
//! synchronous; callers hold no per-conversation lock across it for longer
//! than a single call.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
use courier_core::{DeliveryRecord, DeliveryStatus, Message, MessageId, Timestamp, UserId};
pub use error::StorageError;
pub use memory::MemoryStore;

pub use self::redb::RedbStore;

/// Storage for message rows and per-recipient delivery records.
///
/// Must be Clone (shared by the orchestrator and broker consumers), Send +
/// Sync, and synchronous. Implementations share internal state via Arc, so
/// clones access the same underlying storage.
///
/// # Panics
///
/// In-memory implementations may panic if an internal mutex is poisoned.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Persist a message row and its delivery records atomically.
    ///
    /// # Errors
    ///
    /// `Conflict` if a row with the same id already exists.
    fn insert_message(
        &self,
        message: &Message,
        records: &[DeliveryRecord],
    ) -> Result<(), StorageError>;

    /// Load a message row.
    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError>;

    /// Load one delivery record.
    fn load_record(
        &self,
        id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryRecord>, StorageError>;

    /// Load every delivery record of a message, ordered by recipient.
    fn load_records(&self, id: MessageId) -> Result<Vec<DeliveryRecord>, StorageError>;

    /// Replace `expected` with `next` if the stored record still equals
    /// `expected`.
    ///
    /// Returns `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the record no longer exists.
    fn compare_and_set(
        &self,
        expected: &DeliveryRecord,
        next: &DeliveryRecord,
    ) -> Result<bool, StorageError>;

    /// Records for `recipient` currently in `status`.
    fn records_for(
        &self,
        recipient: UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRecord>, StorageError>;

    /// Delete a message row and all of its records.
    ///
    /// Idempotent: returns `false` if nothing was stored.
    fn delete_message(&self, id: MessageId) -> Result<bool, StorageError>;

    /// Ids of messages whose TTL has passed at `now`.
    fn expired(&self, now: Timestamp) -> Result<Vec<MessageId>, StorageError>;
}

/// Stable one-byte encoding of a status for index keys.
pub(crate) fn status_code(status: DeliveryStatus) -> u8 {
    match status {
        DeliveryStatus::Pending => 0,
        DeliveryStatus::Delivered => 1,
        DeliveryStatus::Sent => 2,
        DeliveryStatus::Read => 3,
        DeliveryStatus::Dropped => 4,
    }
}
