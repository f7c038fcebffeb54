//! Group fan-out, membership changes and re-keying.

use courier_core::{ConversationId, DeliveryStatus, EventClass, ReportedStatus, Route};
use courier_harness::{World, init_tracing};
use courier_server::{DeliveryError, OutgoingMessage};

const GROUP: u128 = 42;
const ALICE: u64 = 1;
const BOB: u64 = 2;
const CAROL: u64 = 3;
const DAVE: u64 = 4;
const ERIN: u64 = 5;

async fn group_world() -> World {
    init_tracing();
    let world = World::new(11);
    world.register(&[ALICE, BOB, CAROL, DAVE, ERIN]).expect("register");
    world.courier.create_group(GROUP, ALICE, [BOB, CAROL, DAVE]).await.expect("create");
    world
}

fn post(sender: u64, body: &str) -> OutgoingMessage {
    OutgoingMessage::new(ConversationId::group(GROUP), sender, body.as_bytes().to_vec())
}

#[tokio::test]
async fn fanout_pushes_online_and_notifies_offline_members() {
    let world = group_world().await;
    world.online_silently(BOB);

    let receipt = world.courier.send(post(ALICE, "hi all")).await.expect("send");
    assert_eq!(receipt.sequence, Some(0));
    assert_eq!(receipt.reported, ReportedStatus::Pending);

    assert_eq!(world.presence.bulk_lookup_count(), 1);
    assert_eq!(world.presence.lookup_count(), 0);
    assert_eq!(world.transport.delivered_to(Route(BOB)).len(), 1);
    assert_eq!(world.broker.count(EventClass::GroupNotification), 2);

    let statuses = world.courier.group_status(receipt.message_id).expect("status");
    assert_eq!(statuses.len(), 3);
    assert!(!statuses.contains_key(&ALICE));
    assert!(statuses.values().all(|status| *status == DeliveryStatus::Pending));

    for member in [BOB, CAROL, DAVE] {
        assert_eq!(world.courier.open(receipt.message_id, member).await.expect("open"), b"hi all");
    }
}

#[tokio::test]
async fn offline_member_is_pushed_on_reconnect() {
    let world = group_world().await;
    let id = world.courier.send(post(ALICE, "later")).await.expect("send").message_id;

    world.pump().await;
    assert_eq!(world.transport.attempt_count(), 0);

    assert_eq!(world.online(CAROL).await.expect("online"), 1);
    let pushed = world.transport.delivered_to(Route(CAROL));
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].message_id, id);
    assert!(!pushed[0].wrapped_key.is_empty());
}

#[tokio::test]
async fn any_member_can_post() {
    let world = group_world().await;
    let first = world.courier.send(post(ALICE, "from alice")).await.expect("send");
    let second = world.courier.send(post(DAVE, "from dave")).await.expect("send");
    assert_eq!(second.sequence, Some(1));

    assert_eq!(world.courier.open(first.message_id, DAVE).await.expect("open"), b"from alice");
    assert_eq!(world.courier.open(second.message_id, ALICE).await.expect("open"), b"from dave");
    assert_eq!(world.courier.open(second.message_id, BOB).await.expect("open"), b"from dave");
    assert!(matches!(
        world.courier.open(second.message_id, DAVE).await,
        Err(DeliveryError::NotARecipient { .. })
    ));

    let outsider = world.courier.send(post(ERIN, "let me in")).await;
    assert!(matches!(outsider, Err(DeliveryError::NotAParticipant { user: ERIN, .. })));
}

#[tokio::test]
async fn leaving_rekeys_and_keeps_in_flight_messages_readable() {
    let world = group_world().await;
    let before = world.courier.send(post(ALICE, "epoch zero")).await.expect("send").message_id;

    world.courier.remove_member(GROUP, CAROL, CAROL).await.expect("leave");
    assert_eq!(world.courier.group_epoch(GROUP).await.expect("epoch"), 1);

    let after = world.courier.send(post(ALICE, "epoch one")).await.expect("send").message_id;
    let statuses = world.courier.group_status(after).expect("status");
    assert!(!statuses.contains_key(&CAROL));
    assert_eq!(statuses.len(), 2);

    assert_eq!(world.courier.open(before, BOB).await.expect("open"), b"epoch zero");
    assert_eq!(world.courier.open(after, BOB).await.expect("open"), b"epoch one");
    assert_eq!(world.courier.open(after, DAVE).await.expect("open"), b"epoch one");
    assert!(matches!(
        world.courier.open(after, CAROL).await,
        Err(DeliveryError::NotARecipient { user: CAROL, .. })
    ));
}

#[tokio::test]
async fn only_the_admin_manages_membership() {
    let world = group_world().await;

    assert!(matches!(
        world.courier.remove_member(GROUP, BOB, CAROL).await,
        Err(DeliveryError::NotAdmin { user: BOB, .. })
    ));
    assert!(matches!(
        world.courier.add_member(GROUP, BOB, ERIN).await,
        Err(DeliveryError::NotAdmin { user: BOB, .. })
    ));
    assert!(matches!(
        world.courier.remove_member(GROUP, ALICE, ALICE).await,
        Err(DeliveryError::AdminCannotLeave(_))
    ));
    assert!(matches!(
        world.courier.remove_member(GROUP, ALICE, ERIN).await,
        Err(DeliveryError::NotAParticipant { user: ERIN, .. })
    ));
    assert_eq!(world.courier.group_epoch(GROUP).await.expect("epoch"), 0);

    world.courier.remove_member(GROUP, ALICE, DAVE).await.expect("remove");
    assert_eq!(world.courier.group_epoch(GROUP).await.expect("epoch"), 1);
}

#[tokio::test]
async fn added_member_reads_new_messages_only() {
    let world = group_world().await;
    let old = world.courier.send(post(ALICE, "before erin")).await.expect("send").message_id;

    world.courier.add_member(GROUP, ALICE, ERIN).await.expect("add");
    world.courier.add_member(GROUP, ALICE, ERIN).await.expect("idempotent");
    assert_eq!(world.courier.group_epoch(GROUP).await.expect("epoch"), 0);

    let new = world.courier.send(post(ALICE, "welcome erin")).await.expect("send").message_id;
    assert_eq!(world.courier.open(new, ERIN).await.expect("open"), b"welcome erin");
    assert!(matches!(
        world.courier.open(old, ERIN).await,
        Err(DeliveryError::NotARecipient { user: ERIN, .. })
    ));

    let reply = world.courier.send(post(ERIN, "thanks")).await.expect("send").message_id;
    assert_eq!(world.courier.open(reply, BOB).await.expect("open"), b"thanks");
}

#[tokio::test]
async fn member_joining_a_busy_group_reads_every_sender() {
    const BACKLOG: usize = 1_005;

    let world = group_world().await;
    for i in 0..BACKLOG {
        world.courier.send(post(ALICE, &format!("backlog {i}"))).await.expect("send");
    }
    world.courier.send(post(BOB, "bob was here")).await.expect("send");

    world.courier.add_member(GROUP, ALICE, ERIN).await.expect("add");

    let from_alice = world.courier.send(post(ALICE, "hi erin")).await.expect("send").message_id;
    let from_bob = world.courier.send(post(BOB, "hey erin")).await.expect("send").message_id;
    let from_carol = world.courier.send(post(CAROL, "first post")).await.expect("send").message_id;

    assert_eq!(world.courier.open(from_alice, ERIN).await.expect("open"), b"hi erin");
    assert_eq!(world.courier.open(from_bob, ERIN).await.expect("open"), b"hey erin");
    assert_eq!(world.courier.open(from_carol, ERIN).await.expect("open"), b"first post");

    let next = world.courier.send(post(ALICE, "still here")).await.expect("send").message_id;
    assert_eq!(world.courier.open(next, ERIN).await.expect("open"), b"still here");
}

#[tokio::test]
async fn blocking_member_gets_a_dropped_record() {
    let world = group_world().await;
    world.presence.block(DAVE, ALICE);

    let receipt = world.courier.send(post(ALICE, "not for dave")).await.expect("send");
    let statuses = world.courier.group_status(receipt.message_id).expect("status");
    assert_eq!(statuses.get(&DAVE), Some(&DeliveryStatus::Dropped));
    assert_eq!(statuses.get(&BOB), Some(&DeliveryStatus::Pending));
    assert_eq!(world.courier.reported_status(receipt.message_id, DAVE).expect("status"), Some(ReportedStatus::Sent));
    assert!(world.courier.open(receipt.message_id, DAVE).await.is_err());
    assert_eq!(world.broker.count(EventClass::GroupNotification), 2);
}

#[tokio::test]
async fn everyone_blocking_looks_like_success() {
    let world = group_world().await;
    for member in [BOB, CAROL, DAVE] {
        world.presence.block(member, ALICE);
    }

    let receipt = world.courier.send(post(ALICE, "anyone?")).await.expect("send");
    assert_eq!(receipt.reported, ReportedStatus::Sent);
    assert_eq!(receipt.sequence, Some(0));
    assert!(world.courier.group_status(receipt.message_id).expect("status").is_empty());
    assert!(world.broker.queued().is_empty());
    for member in [BOB, CAROL, DAVE] {
        assert_eq!(
            world.courier.reported_status(receipt.message_id, member).expect("status"),
            Some(ReportedStatus::Sent)
        );
    }

    world.presence.unblock(BOB, ALICE);
    let next = world.courier.send(post(ALICE, "hello bob")).await.expect("send");
    assert_eq!(next.sequence, Some(1));
}

#[tokio::test]
async fn group_message_purged_after_every_member_reads() {
    let world = group_world().await;
    world.presence.block(DAVE, ALICE);
    let id = world.courier.send(post(ALICE, "read me")).await.expect("send").message_id;

    for member in [BOB, CAROL] {
        for kind in [courier_core::AckKind::Delivered, courier_core::AckKind::Sent] {
            world.courier.ack(id, member, kind).await.expect("ack");
        }
    }
    world.courier.ack(id, BOB, courier_core::AckKind::Read).await.expect("ack");
    assert_eq!(world.courier.group_status(id).expect("status").len(), 3);

    world.courier.ack(id, CAROL, courier_core::AckKind::Read).await.expect("ack");
    assert!(world.courier.group_status(id).expect("status").is_empty());
}

#[tokio::test]
async fn duplicate_group_creation_is_rejected() {
    let world = group_world().await;
    assert!(matches!(
        world.courier.create_group(GROUP, BOB, [CAROL]).await,
        Err(DeliveryError::ConversationExists(_))
    ));
    assert!(matches!(
        world.courier.create_group(7, ALICE, [99]).await,
        Err(DeliveryError::UnknownUser(99))
    ));
}
