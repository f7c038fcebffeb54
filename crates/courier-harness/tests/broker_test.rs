//! Broker ordering and delivery when the broker is unreachable.

use std::time::Duration;

use courier_core::{
    ConversationId, Environment, EventClass, MessageId, RedeliveryEvent, RedeliveryMode, Route,
};
use courier_harness::{World, init_tracing};
use courier_server::{EventBroker, MessageStore, OutgoingMessage};

const ALICE: u64 = 1;
const BOB: u64 = 2;

fn world() -> World {
    init_tracing();
    let world = World::new(5);
    world.register(&[ALICE, BOB]).expect("register");
    world
}

fn text(body: &str) -> OutgoingMessage {
    OutgoingMessage::new(ConversationId::direct(ALICE, BOB), ALICE, body.as_bytes().to_vec())
}

#[tokio::test]
async fn presence_jumps_ahead_of_retries_due_at_the_same_time() {
    let world = world();
    let retry = RedeliveryEvent::TimedRetry { message_id: MessageId(1), recipient: BOB, attempt: 1 };
    let presence = RedeliveryEvent::PresenceOnline { user: BOB };
    let expire = RedeliveryEvent::Expire { message_id: MessageId(1) };

    world.broker.publish(expire.clone(), Some(Duration::from_secs(5))).await.expect("publish");
    world.broker.publish(retry.clone(), None).await.expect("publish");
    world.broker.publish(presence.clone(), None).await.expect("publish");

    let now = world.env.now();
    assert_eq!(world.broker.take_due(now, None), vec![presence, retry]);
    assert_eq!(world.broker.next_due(), Some(now.saturating_add(Duration::from_secs(5))));
    assert!(world.broker.take_due(now, Some(EventClass::Cleanup)).is_empty());

    world.env.advance(Duration::from_secs(5));
    assert_eq!(world.broker.take_due(world.env.now(), Some(EventClass::Cleanup)), vec![expire]);
    assert_eq!(world.broker.next_due(), None);
}

#[tokio::test]
async fn presence_event_from_broker_redelivers() {
    let world = world();
    let id = world.courier.send(text("via broker")).await.expect("send").message_id;

    world.presence.set_online(BOB, Route(BOB));
    world.broker.publish(RedeliveryEvent::PresenceOnline { user: BOB }, None).await.expect("publish");
    assert_eq!(world.pump_class(EventClass::Presence).await, 1);

    assert_eq!(world.transport.delivered_to(Route(BOB)).len(), 1);
    assert_eq!(world.transport.attempts_for(id), 1);

    // The stale offline notification finds the record already pushed.
    world.pump().await;
    assert_eq!(world.transport.attempts_for(id), 1);
}

#[tokio::test]
async fn unreachable_broker_falls_back_to_presence() {
    let world = world();
    world.online_silently(BOB);
    world.transport.fail_next(Route(BOB), 1);
    world.broker.set_unavailable(true);

    let id = world.courier.send(text("no timers")).await.expect("send still succeeds").message_id;
    let record = world.courier.store().load_record(id, BOB).expect("load").expect("record");
    assert_eq!(record.mode, RedeliveryMode::AwaitPresence);
    assert!(world.broker.queued().is_empty());

    world.broker.set_unavailable(false);
    assert_eq!(world.online(BOB).await.expect("online"), 1);
    assert_eq!(world.transport.attempts_for(id), 2);
}

#[tokio::test]
async fn offline_send_without_broker_waits_for_presence() {
    let world = world();
    world.broker.set_unavailable(true);

    let id = world.courier.send(text("queued quietly")).await.expect("send").message_id;
    assert_eq!(world.broker.count(EventClass::OfflineDelivery), 0);

    assert_eq!(world.online(BOB).await.expect("online"), 1);
    assert_eq!(world.transport.delivered_to(Route(BOB))[0].message_id, id);
}

#[tokio::test]
async fn timed_retry_recovers_from_transient_failure() {
    let world = world();
    world.online_silently(BOB);
    world.transport.fail_next(Route(BOB), 1);
    let id = world.courier.send(text("retry me")).await.expect("send").message_id;

    world.run_for(Duration::from_secs(10)).await;
    assert_eq!(world.transport.attempts_for(id), 2);
    assert_eq!(world.broker.count(EventClass::TimedRetry), 0);
    let record = world.courier.store().load_record(id, BOB).expect("load").expect("record");
    assert_eq!(record.mode, RedeliveryMode::Idle);
    assert_eq!(record.attempts, 1);
}
