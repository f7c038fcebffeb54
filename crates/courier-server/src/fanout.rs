//! Group fan-out.
//!
//! One bulk presence lookup per send, one sender-key encryption of the
//! content key shared by every member, then per-member routing: online
//! members get a push, offline members get a single notification event and
//! wait for presence, members who blocked the sender get a dropped record.

use std::collections::BTreeMap;

use courier_core::{
    ConversationId, DeliveryRecord, DeliveryStatus, Environment, Message, MessageId, PresenceInfo,
    RedeliveryEvent, RedeliveryMode, ReportedStatus, RouteDecision, RoutingMode, UserId, decide,
};
use courier_crypto::{ContentKey, CryptoError, content};
use tracing::{error, info};

use crate::{
    error::DeliveryError,
    service::{Courier, OutgoingMessage, SendReceipt},
    session_store::CryptoContext,
    storage::MessageStore,
    wire,
};

impl<E: Environment, S: MessageStore> Courier<E, S> {
    pub(crate) async fn send_group(&self, outgoing: OutgoingMessage) -> Result<SendReceipt, DeliveryError> {
        let id = outgoing.conversation;
        let sender = outgoing.sender;
        let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;

        let members = {
            let state = lock.lock().await;
            group_members(&state.context, id, sender)?
        };

        let presence = self.collaborators.presence.bulk_get(&members).await.map_err(|err| {
            error!(conversation = %id, %err, "bulk presence lookup failed");
            DeliveryError::from(err)
        })?;
        let offline = PresenceInfo::offline();
        let decisions: BTreeMap<UserId, RouteDecision> = members
            .iter()
            .map(|&member| {
                let info = presence.get(&member).unwrap_or(&offline);
                (member, decide(sender, info, RoutingMode::Normal))
            })
            .collect();

        let mut state = lock.lock().await;
        let sequence = state.peek_sequence();
        if decisions.values().all(|decision| *decision == RouteDecision::Blocked) {
            state.commit_sequence();
            drop(state);
            return Ok(self.suppress(&outgoing, members, sequence).await);
        }

        // Membership may have changed while presence was looked up.
        let current = group_members(&state.context, id, sender)?;
        let decisions: BTreeMap<UserId, RouteDecision> =
            decisions.into_iter().filter(|(member, _)| current.contains(member)).collect();
        let CryptoContext::Group(group) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(id));
        };
        let sender_keys = group
            .sessions
            .get_mut(&sender)
            .ok_or(DeliveryError::NotAParticipant { user: sender, conversation: id })?;
        let mut session = sender_keys.current.clone();

        let content_key = ContentKey::from_bytes(self.env.random_key());
        let sealed = content::seal(&outgoing.body, &content_key, self.random_nonce());
        let mut suffix = [0u8; 8];
        self.env.random_bytes(&mut suffix);
        let wrapped = wire::encode(
            &session.encrypt(content_key.as_bytes(), suffix).map_err(CryptoError::from)?,
        )?;

        let now = self.env.now();
        let message_id = MessageId(self.env.random_u128());
        let mut records = Vec::with_capacity(decisions.len());
        let mut wrapped_keys = BTreeMap::new();
        for (&member, decision) in &decisions {
            let record = DeliveryRecord::pending(message_id, member, now);
            let record = match decision {
                RouteDecision::Blocked => record.with_status(DeliveryStatus::Dropped, now),
                RouteDecision::Offline => record.with_mode(RedeliveryMode::AwaitPresence, 0, now),
                RouteDecision::Direct(_) => record,
            };
            if *decision != RouteDecision::Blocked {
                wrapped_keys.insert(member, wrapped.clone());
            }
            records.push(record);
        }

        let message = Message {
            id: message_id,
            conversation: id,
            sender,
            recipients: decisions.keys().copied().collect(),
            sequence,
            body: wire::encode(&sealed)?,
            wrapped_keys,
            created_at: now,
            ttl: outgoing.ttl.unwrap_or(self.config.default_ttl),
            media: outgoing.media,
        };

        self.insert_with_retry(&message, &records)?;
        sender_keys.current = session;
        state.commit_sequence();
        drop(state);

        info!(
            %message_id,
            conversation = %id,
            sequence,
            members = decisions.len(),
            "group message persisted"
        );

        for record in records {
            match decisions.get(&record.recipient) {
                Some(RouteDecision::Direct(route)) => {
                    let outcome = self.push(*route, &message, record.recipient).await;
                    self.settle(&record, outcome, 0).await?;
                },
                Some(RouteDecision::Offline) => {
                    let event = RedeliveryEvent::GroupNotification {
                        message_id,
                        recipient: record.recipient,
                    };
                    self.publish_or_log(event, None).await;
                },
                Some(RouteDecision::Blocked) | None => {},
            }
        }

        Ok(SendReceipt { message_id, sequence: Some(sequence), reported: ReportedStatus::Pending })
    }
}

/// Members other than `sender`, after checking `sender` belongs.
fn group_members(
    context: &CryptoContext,
    id: ConversationId,
    sender: UserId,
) -> Result<Vec<UserId>, DeliveryError> {
    let CryptoContext::Group(group) = context else {
        return Err(DeliveryError::UnknownConversation(id));
    };
    if !group.members.contains(&sender) {
        return Err(DeliveryError::NotAParticipant { user: sender, conversation: id });
    }
    Ok(group.members.iter().copied().filter(|&member| member != sender).collect())
}
