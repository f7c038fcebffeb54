//! Injected storage failures never leave partial writes.
//!
//! Every operation is applied to a `ChaoticStore` and, only when it
//! succeeded, to a reference store. Both must end up identical.

use std::time::Duration;

use courier_core::{ConversationId, DeliveryRecord, DeliveryStatus, Message, MessageId, Timestamp};
use courier_server::{ChaoticStore, MemoryStore, MessageStore, StorageError};
use proptest::prelude::*;

const RECIPIENTS: [u64; 3] = [2, 3, 4];

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Advance { id: u8, recipient: usize },
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Insert),
        (0u8..6, 0usize..RECIPIENTS.len()).prop_map(|(id, recipient)| Op::Advance { id, recipient }),
        (0u8..6).prop_map(Op::Delete),
    ]
}

fn message(id: u8) -> Message {
    Message {
        id: MessageId(u128::from(id)),
        conversation: ConversationId::group(1),
        sender: 1,
        recipients: RECIPIENTS.to_vec(),
        sequence: u64::from(id),
        body: vec![id; 8],
        wrapped_keys: RECIPIENTS.iter().map(|&r| (r, vec![id; 4])).collect(),
        created_at: Timestamp::from_millis(u64::from(id) * 1_000),
        ttl: Duration::from_secs(10),
        media: None,
    }
}

fn next_status(status: DeliveryStatus) -> DeliveryStatus {
    match status {
        DeliveryStatus::Pending => DeliveryStatus::Delivered,
        DeliveryStatus::Delivered => DeliveryStatus::Sent,
        _ => DeliveryStatus::Read,
    }
}

/// Apply `op` to `store`. A duplicate insert counts as success.
fn apply<S: MessageStore>(store: &S, op: &Op) -> Result<(), StorageError> {
    match *op {
        Op::Insert(id) => {
            let message = message(id);
            let records: Vec<_> = RECIPIENTS
                .iter()
                .map(|&r| DeliveryRecord::pending(message.id, r, message.created_at))
                .collect();
            match store.insert_message(&message, &records) {
                Err(StorageError::Conflict(_)) => Ok(()),
                other => other,
            }
        },
        Op::Advance { id, recipient } => {
            let id = MessageId(u128::from(id));
            let Some(record) = store.load_record(id, RECIPIENTS[recipient])? else {
                return Ok(());
            };
            let next = record.with_status(next_status(record.status), Timestamp::from_millis(99));
            store.compare_and_set(&record, &next).map(|_| ())
        },
        Op::Delete(id) => store.delete_message(MessageId(u128::from(id))).map(|_| ()),
    }
}

fn snapshot(store: &MemoryStore) -> Vec<(Option<Message>, Vec<DeliveryRecord>)> {
    (0u8..6)
        .map(|id| {
            let id = MessageId(u128::from(id));
            (
                store.load_message(id).expect("load"),
                store.load_records(id).expect("records"),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn failed_operations_leave_no_trace(
        seed in any::<u64>(),
        rate in 0.0f64..0.6,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let chaotic = ChaoticStore::new(MemoryStore::new(), rate, seed);
        let reference = MemoryStore::new();

        for op in &ops {
            if apply(&chaotic, op).is_ok() {
                apply(&reference, op).expect("reference store never fails");
            }
        }

        prop_assert_eq!(snapshot(chaotic.inner()), snapshot(&reference));
        prop_assert_eq!(chaotic.inner().message_count(), reference.message_count());
        prop_assert_eq!(chaotic.inner().record_count(), reference.record_count());
        prop_assert_eq!(
            chaotic.inner().expired(Timestamp::from_millis(u64::MAX)).expect("expired"),
            reference.expired(Timestamp::from_millis(u64::MAX)).expect("expired")
        );
    }

    #[test]
    fn status_index_tracks_records(ops in prop::collection::vec(op(), 1..40)) {
        let store = MemoryStore::new();
        for op in &ops {
            apply(&store, op).expect("memory store never fails");
        }

        for &recipient in &RECIPIENTS {
            for status in [DeliveryStatus::Pending, DeliveryStatus::Delivered, DeliveryStatus::Sent, DeliveryStatus::Read] {
                for record in store.records_for(recipient, status).expect("index") {
                    prop_assert_eq!(record.status, status);
                    prop_assert_eq!(record.recipient, recipient);
                    let stored = store.load_record(record.message_id, recipient).expect("load");
                    prop_assert_eq!(stored, Some(record));
                }
            }
        }
    }
}
