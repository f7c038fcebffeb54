//! Redb-backed durable store.
//!
//! Uses Redb's ACID transactions with copy-on-write for crash safety. Every
//! trait method is a single transaction, so a crash leaves either the old or
//! the new state, never a row without its records or a stale index entry.

use std::{path::Path, sync::Arc};

use courier_core::{DeliveryRecord, DeliveryStatus, Message, MessageId, Timestamp, UserId};
use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};

use super::{MessageStore, StorageError, status_code};

/// Table: messages
/// Key: message id as big-endian bytes [16 bytes]
/// Value: CBOR-encoded Message
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: records
/// Key: (message id, recipient) as big-endian bytes [24 bytes]
/// Value: CBOR-encoded DeliveryRecord
const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

/// Table: recipient_index
/// Key: (recipient, status code, message id) as big-endian bytes [25 bytes]
/// Value: empty
const RECIPIENT_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("recipient_index");

/// Table: expiry_index
/// Key: (expires at millis, message id) as big-endian bytes [24 bytes]
/// Value: empty
const EXPIRY_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("expiry_index");

/// Value stored in the index tables.
const EMPTY: &[u8] = &[];

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database at `path`, creating missing tables.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(RECORDS).map_err(io)?;
            let _ = txn.open_table(RECIPIENT_INDEX).map_err(io)?;
            let _ = txn.open_table(EXPIRY_INDEX).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove every record of `id` and its index entries inside `txn`.
    fn remove_records(txn: &WriteTransaction, id: MessageId) -> Result<(), StorageError> {
        let mut records = txn.open_table(RECORDS).map_err(io)?;
        let mut index = txn.open_table(RECIPIENT_INDEX).map_err(io)?;

        let start = record_key(id, UserId::MIN);
        let end = record_key(id, UserId::MAX);
        let mut doomed = Vec::new();
        for entry in records.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            let record: DeliveryRecord = decode(value.value())?;
            doomed.push((key.value().to_vec(), record));
        }

        for (key, record) in doomed {
            records.remove(key.as_slice()).map_err(io)?;
            let index_key = index_key(record.recipient, record.status, id);
            index.remove(index_key.as_slice()).map_err(io)?;
        }
        Ok(())
    }
}

impl MessageStore for RedbStore {
    fn insert_message(
        &self,
        message: &Message,
        records: &[DeliveryRecord],
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            let key = message_key(message.id);
            if messages.get(key.as_slice()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict(message.id));
            }
            messages.insert(key.as_slice(), encode(message)?.as_slice()).map_err(io)?;

            let mut table = txn.open_table(RECORDS).map_err(io)?;
            let mut index = txn.open_table(RECIPIENT_INDEX).map_err(io)?;
            for record in records {
                let key = record_key(record.message_id, record.recipient);
                table.insert(key.as_slice(), encode(record)?.as_slice()).map_err(io)?;
                let index_key = index_key(record.recipient, record.status, record.message_id);
                index.insert(index_key.as_slice(), EMPTY).map_err(io)?;
            }

            let mut expiry = txn.open_table(EXPIRY_INDEX).map_err(io)?;
            let expiry_key = expiry_key(message.expires_at(), message.id);
            expiry.insert(expiry_key.as_slice(), EMPTY).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(())
    }

    fn load_message(&self, id: MessageId) -> Result<Option<Message>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        match table.get(message_key(id).as_slice()).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn load_record(
        &self,
        id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(RECORDS).map_err(io)?;

        match table.get(record_key(id, recipient).as_slice()).map_err(io)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    fn load_records(&self, id: MessageId) -> Result<Vec<DeliveryRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(RECORDS).map_err(io)?;

        let start = record_key(id, UserId::MIN);
        let end = record_key(id, UserId::MAX);
        let mut records = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn compare_and_set(
        &self,
        expected: &DeliveryRecord,
        next: &DeliveryRecord,
    ) -> Result<bool, StorageError> {
        let key = record_key(expected.message_id, expected.recipient);

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut records = txn.open_table(RECORDS).map_err(io)?;
            let current: DeliveryRecord = match records.get(key.as_slice()).map_err(io)? {
                Some(value) => decode(value.value())?,
                None => return Err(StorageError::NotFound(expected.message_id)),
            };
            if &current != expected {
                return Ok(false);
            }
            records.insert(key.as_slice(), encode(next)?.as_slice()).map_err(io)?;

            let mut index = txn.open_table(RECIPIENT_INDEX).map_err(io)?;
            let old = index_key(current.recipient, current.status, current.message_id);
            index.remove(old.as_slice()).map_err(io)?;
            let new = index_key(next.recipient, next.status, next.message_id);
            index.insert(new.as_slice(), EMPTY).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn records_for(
        &self,
        recipient: UserId,
        status: DeliveryStatus,
    ) -> Result<Vec<DeliveryRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let index = txn.open_table(RECIPIENT_INDEX).map_err(io)?;
        let records = txn.open_table(RECORDS).map_err(io)?;

        let start = index_key(recipient, status, MessageId(0));
        let end = index_key(recipient, status, MessageId(u128::MAX));
        let mut found = Vec::new();
        for entry in index.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            let id = MessageId(read_u128(&key.value()[9..]));
            if let Some(value) = records.get(record_key(id, recipient).as_slice()).map_err(io)? {
                found.push(decode(value.value())?);
            }
        }
        Ok(found)
    }

    fn delete_message(&self, id: MessageId) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;
        let existed = {
            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            let removed = messages.remove(message_key(id).as_slice()).map_err(io)?;
            match removed {
                Some(value) => Some(decode::<Message>(value.value())?),
                None => None,
            }
        };

        let Some(message) = existed else {
            // nothing to commit
            return Ok(false);
        };

        Self::remove_records(&txn, id)?;
        {
            let mut expiry = txn.open_table(EXPIRY_INDEX).map_err(io)?;
            expiry.remove(expiry_key(message.expires_at(), id).as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;
        Ok(true)
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<MessageId>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(EXPIRY_INDEX).map_err(io)?;

        let end = expiry_key(now, MessageId(u128::MAX));
        let mut ids = Vec::new();
        for entry in table.range(..=end.as_slice()).map_err(io)? {
            let (key, _) = entry.map_err(io)?;
            ids.push(MessageId(read_u128(&key.value()[8..])));
        }
        Ok(ids)
    }
}

fn io(e: impl std::fmt::Display) -> StorageError {
    StorageError::Io(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Layout: [id: 16 bytes BE]
fn message_key(id: MessageId) -> [u8; 16] {
    id.0.to_be_bytes()
}

/// Layout: [id: 16 bytes BE][recipient: 8 bytes BE]
fn record_key(id: MessageId, recipient: UserId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(&id.0.to_be_bytes());
    key[16..].copy_from_slice(&recipient.to_be_bytes());
    key
}

/// Layout: [recipient: 8 bytes BE][status: 1 byte][id: 16 bytes BE]
fn index_key(recipient: UserId, status: DeliveryStatus, id: MessageId) -> [u8; 25] {
    let mut key = [0u8; 25];
    key[..8].copy_from_slice(&recipient.to_be_bytes());
    key[8] = status_code(status);
    key[9..].copy_from_slice(&id.0.to_be_bytes());
    key
}

/// Layout: [expires at: 8 bytes BE][id: 16 bytes BE]
fn expiry_key(expires_at: Timestamp, id: MessageId) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&expires_at.as_millis().to_be_bytes());
    key[8..].copy_from_slice(&id.0.to_be_bytes());
    key
}

fn read_u128(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[..16]);
    u128::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use courier_core::ConversationId;
    use tempfile::tempdir;

    use super::*;

    fn message(id: u128) -> Message {
        Message {
            id: MessageId(id),
            conversation: ConversationId::direct(1, 2),
            sender: 1,
            recipients: vec![2],
            sequence: 3,
            body: vec![9; 40],
            wrapped_keys: BTreeMap::from([(2, vec![7; 16])]),
            created_at: Timestamp::from_millis(5_000),
            ttl: Duration::from_secs(10),
            media: None,
        }
    }

    #[test]
    fn index_keys_sort_by_recipient_then_status() {
        let a = index_key(1, DeliveryStatus::Read, MessageId(0));
        let b = index_key(2, DeliveryStatus::Pending, MessageId(0));
        let c = index_key(2, DeliveryStatus::Delivered, MessageId(0));
        assert!(a < b && b < c);
    }

    #[test]
    fn row_roundtrips_through_cbor() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("courier.redb")).unwrap();
        let msg = message(1);
        let record = DeliveryRecord::pending(msg.id, 2, msg.created_at);

        store.insert_message(&msg, std::slice::from_ref(&record)).unwrap();

        assert_eq!(store.load_message(msg.id).unwrap(), Some(msg));
        assert_eq!(store.records_for(2, DeliveryStatus::Pending).unwrap(), vec![record]);
    }

    #[test]
    fn delete_clears_indexes() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("courier.redb")).unwrap();
        let msg = message(1);
        store.insert_message(&msg, &[DeliveryRecord::pending(msg.id, 2, msg.created_at)]).unwrap();

        assert!(store.delete_message(msg.id).unwrap());
        assert!(!store.delete_message(msg.id).unwrap());
        assert!(store.records_for(2, DeliveryStatus::Pending).unwrap().is_empty());
        assert!(store.expired(Timestamp::from_millis(u64::MAX)).unwrap().is_empty());
    }
}
