#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use courier_core::{DeliveryRecord, DeliveryStatus, Message, MessageId, Timestamp, UserId};

use super::{MessageStore, StorageError, status_code};

/// In-memory store for tests and simulation.
///
/// All state sits behind one `Arc<Mutex<_>>`, so every trait method is atomic
/// and clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    messages: HashMap<MessageId, Message>,
    /// Records ordered by (message, recipient)
    records: BTreeMap<(MessageId, UserId), DeliveryRecord>,
    /// (recipient, status code, message)
    by_recipient: BTreeSet<(UserId, u8, MessageId)>,
    /// (expiry, message)
    by_expiry: BTreeSet<(Timestamp, MessageId)>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored message rows.
    pub fn message_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").messages.len()
    }

    /// Number of stored delivery records.
    pub fn record_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").records.len()
    }
}

impl MessageStore for MemoryStore {
    fn insert_message(
        &self,
        message: &Message,
        records: &[DeliveryRecord],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if inner.messages.contains_key(&message.id) {
            return Err(StorageError::Conflict(message.id));
        }

        for record in records {
            debug_assert_eq!(record.message_id, message.id);
            inner.by_recipient.insert((
                record.recipient,
                status_code(record.status),
                record.message_id,
            ));
            inner.records.insert((record.message_id, record.recipient), record.clone());
        }
        inner.by_expiry.insert((message.expires_at(), message.id));
        inner.messages.insert(message.id, message.clone());

        Ok(())
    }

    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.messages.get(&id).cloned())
    }

    fn load_record(
        &self,
        id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.records.get(&(id, recipient)).cloned())
    }

    fn load_records(&self, id: MessageId) -> Result<Vec<DeliveryRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .records
            .range((id, UserId::MIN)..=(id, UserId::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn compare_and_set(
        &self,
        expected: &DeliveryRecord,
        next: &DeliveryRecord,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let key = (expected.message_id, expected.recipient);

        let Some(current) = inner.records.get(&key) else {
            return Err(StorageError::NotFound(expected.message_id));
        };
        if current != expected {
            return Ok(false);
        }

        inner.by_recipient.remove(&(key.1, status_code(expected.status), key.0));
        inner.by_recipient.insert((key.1, status_code(next.status), key.0));
        inner.records.insert(key, next.clone());
        Ok(true)
    }

    fn records_for(
        &self,
        recipient: UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        let code = status_code(status);

        Ok(inner
            .by_recipient
            .range((recipient, code, MessageId(0))..=(recipient, code, MessageId(u128::MAX)))
            .filter_map(|(user, _, id)| inner.records.get(&(*id, *user)).cloned())
            .collect())
    }

    fn delete_message(&self, id: MessageId) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        let Some(message) = inner.messages.remove(&id) else {
            return Ok(false);
        };
        inner.by_expiry.remove(&(message.expires_at(), id));

        let keys: Vec<_> =
            inner.records.range((id, UserId::MIN)..=(id, UserId::MAX)).map(|(k, _)| *k).collect();
        for key in keys {
            if let Some(record) = inner.records.remove(&key) {
                inner.by_recipient.remove(&(key.1, status_code(record.status), id));
            }
        }
        Ok(true)
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<MessageId>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .by_expiry
            .range(..=(now, MessageId(u128::MAX)))
            .map(|(_, id)| *id)
            .collect())
    }
}
