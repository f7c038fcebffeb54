//! Property tests for delivery state under arbitrary ack and event orders.

use std::time::Duration;

use courier_core::{AckKind, ConversationId, DeliveryStatus, RedeliveryEvent, Route};
use courier_harness::World;
use courier_server::{AckOutcome, MessageStore, OutgoingMessage};
use proptest::prelude::*;

const ALICE: u64 = 1;
const BOB: u64 = 2;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime")
}

fn ack_kind() -> impl Strategy<Value = AckKind> {
    prop_oneof![Just(AckKind::Delivered), Just(AckKind::Sent), Just(AckKind::Read)]
}

fn text(body: &str) -> OutgoingMessage {
    OutgoingMessage::new(ConversationId::direct(ALICE, BOB), ALICE, body.as_bytes().to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn acks_never_move_status_backwards(seed in any::<u64>(), acks in prop::collection::vec(ack_kind(), 0..12)) {
        let rt = runtime();
        rt.block_on(async {
            let world = World::new(seed);
            world.register(&[ALICE, BOB]).expect("register");
            let id = world.courier.send(text("p")).await.expect("send").message_id;

            let mut last_rank = DeliveryStatus::Pending.rank();
            let mut read = false;
            for kind in acks {
                let outcome = world.courier.ack(id, BOB, kind).await.expect("ack");
                if read {
                    prop_assert_eq!(outcome, AckOutcome::Gone);
                    continue;
                }
                prop_assert_ne!(outcome, AckOutcome::Gone);

                match world.courier.delivery_status(id, BOB).expect("status") {
                    Some(status) => {
                        prop_assert!(status.rank() >= last_rank);
                        last_rank = status.rank();
                    },
                    None => {
                        prop_assert_eq!(outcome, AckOutcome::Applied(DeliveryStatus::Read));
                        read = true;
                    },
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn duplicate_events_never_add_pushes(
        seed in any::<u64>(),
        failures in 0usize..6,
        duplicates in 0usize..4,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let world = World::new(seed);
            world.register(&[ALICE, BOB]).expect("register");
            world.online_silently(BOB);
            world.transport.fail_next(Route(BOB), failures);

            let id = world.courier.send(text("d")).await.expect("send").message_id;
            let retries: Vec<RedeliveryEvent> =
                world.broker.queued().into_iter().map(|queued| queued.event).collect();

            world.run_for(Duration::from_secs(300)).await;
            for event in retries.iter().cycle().take(duplicates * retries.len()) {
                world.courier.handle_event(event.clone()).await.expect("duplicate");
            }

            let attempts = world.transport.attempts_for(id);
            prop_assert!(attempts <= 4);
            prop_assert_eq!(attempts, (failures + 1).min(4));
            prop_assert_eq!(world.transport.delivered_to(Route(BOB)).len(), usize::from(failures < 4));

            let record = world.courier.store().load_record(id, BOB).expect("load").expect("record");
            prop_assert_eq!(record.status, DeliveryStatus::Pending);
            Ok(())
        })?;
    }
}
