//! The delivery orchestrator.
//!
//! `Courier` is the single entry point: senders submit messages, recipients
//! acknowledge and open them, presence changes and broker events drive
//! redelivery. Every message passes through the conversation's session under
//! that conversation's lock before it is persisted, so sequence numbers and
//! ratchet counters advance together.
//!
//! Operations are split by concern across sibling modules (`routing`,
//! `scheduler`, `fanout`, `group_keys`, `cleanup`); they all extend this
//! type.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use courier_core::{
    AckKind, ConversationId, DeliveryRecord, DeliveryStatus, Environment, MediaRef, Message,
    MessageId, RedeliveryEvent, RedeliveryMode, ReportedStatus, RouteDecision, RoutingMode,
    Transition, UserId, decide,
};
use courier_crypto::{
    ContentKey, CryptoError, GroupMessage, IdentityKeyPair, LocalKeys, OneTimePreKey,
    RatchetMessage, RatchetSession, SealedContent, SenderKeyError, SignedPreKey, content,
};
use tracing::{debug, info, warn};

use crate::{
    blob::{BlobStore, DistributionCache},
    broker::EventBroker,
    config::CourierConfig,
    devices::DeviceDirectory,
    error::DeliveryError,
    prekey_registry::{PrekeyRegistry, StoreResult},
    presence::PresenceLookup,
    session_store::{ConversationState, CryptoContext, SessionStore},
    storage::MessageStore,
    suppressed::SuppressedSends,
    transport::PushTransport,
    wire,
};

/// External systems the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Presence and block registry
    pub presence: Arc<dyn PresenceLookup>,
    /// Durable event broker
    pub broker: Arc<dyn EventBroker>,
    /// Push channel to connected clients
    pub transport: Arc<dyn PushTransport>,
    /// Encrypted media storage
    pub blobs: Arc<dyn BlobStore>,
    /// Distribution cache in front of the media storage
    pub cache: Arc<dyn DistributionCache>,
}

/// A message as submitted by its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Target conversation
    pub conversation: ConversationId,
    /// Sending user
    pub sender: UserId,
    /// Plaintext body, sealed before it is stored
    pub body: Vec<u8>,
    /// Media uploaded by the client before sending
    pub media: Option<MediaRef>,
    /// Lifetime override
    pub ttl: Option<Duration>,
}

impl OutgoingMessage {
    /// Plain message with the default TTL and no media.
    pub fn new(conversation: ConversationId, sender: UserId, body: impl Into<Vec<u8>>) -> Self {
        Self { conversation, sender, body: body.into(), media: None, ttl: None }
    }

    /// Attach media.
    #[must_use]
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Override the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// What the sender learns about a submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Id assigned to the message
    pub message_id: MessageId,
    /// Position in the conversation; assigned even when a block suppressed
    /// the message
    pub sequence: Option<u64>,
    /// Status shown to the sender
    pub reported: ReportedStatus,
}

/// Result of applying a recipient ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Record moved to this status
    Applied(DeliveryStatus),
    /// Record was already at this status
    AlreadyApplied(DeliveryStatus),
    /// Ack does not follow from the current status and was discarded
    Inconsistent {
        /// Stored status
        current: DeliveryStatus,
        /// Status the ack asked for
        requested: DeliveryStatus,
    },
    /// Message no longer exists
    Gone,
}

/// Presence-aware, end-to-end encrypted delivery orchestrator.
pub struct Courier<E: Environment, S: MessageStore> {
    pub(crate) env: E,
    pub(crate) store: S,
    pub(crate) config: CourierConfig,
    pub(crate) collaborators: Collaborators,
    pub(crate) sessions: SessionStore,
    pub(crate) devices: DeviceDirectory,
    pub(crate) prekeys: PrekeyRegistry,
    pub(crate) suppressed: SuppressedSends,
}

impl<E: Environment, S: MessageStore> Courier<E, S> {
    /// Wire an orchestrator to its store and collaborators.
    pub fn new(env: E, store: S, collaborators: Collaborators, config: CourierConfig) -> Self {
        Self {
            env,
            store,
            prekeys: PrekeyRegistry::with_capacity(config.prekey_capacity),
            suppressed: SuppressedSends::with_capacity(config.suppressed_capacity),
            config,
            collaborators,
            sessions: SessionStore::default(),
            devices: DeviceDirectory::default(),
        }
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Message store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Public pre-key directory.
    pub fn prekeys(&self) -> &PrekeyRegistry {
        &self.prekeys
    }

    /// Active configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Generate device keys for `user` and publish the bundle with
    /// `one_time_keys` one-time pre-keys.
    ///
    /// Returns `false` without touching anything if the user already exists.
    pub fn register_user(&self, user: UserId, one_time_keys: u32) -> Result<bool, DeliveryError> {
        let identity = IdentityKeyPair::from_seeds(self.env.random_key(), self.env.random_key());
        let signed = SignedPreKey::new(1, &identity, self.env.random_key());
        let keys = LocalKeys::new(identity, signed);
        let bundle = keys.public_bundle();

        if !self.devices.register(user, keys) {
            debug!(user, "user already registered");
            return Ok(false);
        }
        if self.prekeys.publish(user, bundle) == StoreResult::Evicted {
            debug!(user, "pre-key registry full, evicted least recently used bundle");
        }
        self.replenish_one_time_keys(user, one_time_keys)?;

        info!(user, one_time_keys, "user registered");
        Ok(true)
    }

    /// Generate and publish `count` more one-time pre-keys for `user`.
    ///
    /// Returns how many are now queued in the directory.
    pub fn replenish_one_time_keys(&self, user: UserId, count: u32) -> Result<usize, DeliveryError> {
        let ids = self.devices.reserve_one_time_ids(user, count).ok_or(DeliveryError::UnknownUser(user))?;
        let keys: Vec<OneTimePreKey> =
            ids.into_iter().map(|id| OneTimePreKey::new(id, self.env.random_key())).collect();
        let publics: Vec<(u32, [u8; 32])> =
            keys.iter().map(|key| (key.id(), key.public_bytes())).collect();

        let bundle = self
            .devices
            .with_keys(user, |local| {
                for key in keys {
                    local.add_one_time(key);
                }
                local.public_bundle()
            })
            .ok_or(DeliveryError::UnknownUser(user))?;

        if !self.prekeys.add_one_time_keys(user, publics.iter().copied()) {
            // Evicted from the directory since registration.
            self.prekeys.publish(user, bundle);
            self.prekeys.add_one_time_keys(user, publics);
        }
        Ok(self.prekeys.one_time_count(user))
    }

    /// Make sure both participants of a direct conversation hold a session.
    ///
    /// Fetches the responder's bundle (consuming one one-time pre-key) only
    /// when no session exists yet. The responder side is established from
    /// an empty handshake message immediately, so either participant can
    /// send first afterwards.
    pub async fn open_direct(
        &self,
        initiator: UserId,
        responder: UserId,
    ) -> Result<ConversationId, DeliveryError> {
        let id = ConversationId::direct(initiator, responder);
        if initiator == responder {
            return Err(DeliveryError::NotAParticipant { user: responder, conversation: id });
        }

        let lock = self.sessions.get_or_insert_with(id, ConversationState::direct);
        let mut state = lock.lock().await;
        let CryptoContext::Direct(direct) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(id));
        };
        if direct.sessions.contains_key(&initiator) && direct.sessions.contains_key(&responder) {
            return Ok(id);
        }

        let identity = self.devices.identity(initiator).ok_or(DeliveryError::UnknownUser(initiator))?;
        let bundle = self.prekeys.fetch(responder).ok_or(DeliveryError::NoPrekeyBundle(responder))?;
        let session_config = self.config.session();

        let mut outbound = RatchetSession::initiate(
            &identity,
            &bundle,
            self.env.random_key(),
            self.env.random_key(),
            session_config,
        )
        .map_err(CryptoError::from)?;
        let handshake = outbound.encrypt(&[], self.env.random_key()).map_err(CryptoError::from)?;
        let (inbound, _) = self
            .devices
            .with_keys(responder, |local| RatchetSession::respond(local, &handshake, session_config))
            .ok_or(DeliveryError::UnknownUser(responder))?
            .map_err(CryptoError::from)?;

        if outbound.is_degraded() {
            warn!(conversation = %id, responder, "session established without a one-time pre-key");
        }
        direct.sessions.insert(initiator, outbound);
        direct.sessions.insert(responder, inbound);

        info!(conversation = %id, initiator, responder, "direct session established");
        Ok(id)
    }

    /// Submit a message.
    ///
    /// The returned receipt never reveals a block: a suppressed message is
    /// reported as sent.
    pub async fn send(&self, message: OutgoingMessage) -> Result<SendReceipt, DeliveryError> {
        match message.conversation {
            ConversationId::Direct(a, b) => {
                let peer = if message.sender == a {
                    b
                } else if message.sender == b {
                    a
                } else {
                    return Err(DeliveryError::NotAParticipant {
                        user: message.sender,
                        conversation: message.conversation,
                    });
                };
                self.send_direct(message, peer).await
            },
            ConversationId::Group(_) => self.send_group(message).await,
        }
    }

    async fn send_direct(
        &self,
        outgoing: OutgoingMessage,
        peer: UserId,
    ) -> Result<SendReceipt, DeliveryError> {
        let id = outgoing.conversation;
        let sender = outgoing.sender;

        let presence = self.lookup(peer).await?;
        let decision = decide(sender, &presence, RoutingMode::Normal);
        debug!(conversation = %id, recipient = peer, ?decision, "routing decision");

        self.open_direct(sender, peer).await?;
        if decision == RouteDecision::Blocked {
            let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;
            let sequence = {
                let mut state = lock.lock().await;
                let sequence = state.peek_sequence();
                state.commit_sequence();
                sequence
            };
            return Ok(self.suppress(&outgoing, vec![peer], sequence).await);
        }

        let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;
        let mut state = lock.lock().await;
        let sequence = state.peek_sequence();
        let CryptoContext::Direct(direct) = &mut state.context else {
            return Err(DeliveryError::UnknownConversation(id));
        };
        let mut session =
            direct.sessions.get(&sender).cloned().ok_or(DeliveryError::UnknownConversation(id))?;

        let content_key = ContentKey::from_bytes(self.env.random_key());
        let sealed = content::seal(&outgoing.body, &content_key, self.random_nonce());
        let wrapped = session
            .encrypt(content_key.as_bytes(), self.env.random_key())
            .map_err(CryptoError::from)?;

        let now = self.env.now();
        let message = Message {
            id: MessageId(self.env.random_u128()),
            conversation: id,
            sender,
            recipients: vec![peer],
            sequence,
            body: wire::encode(&sealed)?,
            wrapped_keys: BTreeMap::from([(peer, wire::encode(&wrapped)?)]),
            created_at: now,
            ttl: outgoing.ttl.unwrap_or(self.config.default_ttl),
            media: outgoing.media,
        };
        let mode = match decision {
            RouteDecision::Offline => RedeliveryMode::AwaitPresence,
            _ => RedeliveryMode::Idle,
        };
        let record = DeliveryRecord::pending(message.id, peer, now).with_mode(mode, 0, now);

        self.insert_with_retry(&message, std::slice::from_ref(&record))?;
        direct.sessions.insert(sender, session);
        state.commit_sequence();
        drop(state);

        info!(message_id = %message.id, conversation = %id, sequence, "message persisted");

        match decision {
            RouteDecision::Direct(route) => {
                let outcome = self.push(route, &message, peer).await;
                self.settle(&record, outcome, 0).await?;
            },
            RouteDecision::Offline => {
                let event = RedeliveryEvent::OfflineDelivery { message_id: message.id, recipient: peer };
                self.publish_or_log(event, None).await;
            },
            RouteDecision::Blocked => {},
        }

        Ok(SendReceipt {
            message_id: message.id,
            sequence: Some(sequence),
            reported: ReportedStatus::Pending,
        })
    }

    /// Apply a recipient acknowledgment.
    ///
    /// Duplicates are no-ops; acks that skip or reverse a step are logged
    /// and discarded. Reaching `Delivered` schedules expiry at the TTL
    /// deadline; reaching `Read` purges the message once every recipient is
    /// done with it.
    pub async fn ack(
        &self,
        message_id: MessageId,
        recipient: UserId,
        kind: AckKind,
    ) -> Result<AckOutcome, DeliveryError> {
        let Some(message) = self.store.load_message(message_id)? else {
            debug!(%message_id, recipient, ?kind, "ack for purged message");
            return Ok(AckOutcome::Gone);
        };
        if !message.recipients.contains(&recipient) {
            return Err(DeliveryError::NotARecipient { message_id, user: recipient });
        }

        loop {
            let Some(record) = self.store.load_record(message_id, recipient)? else {
                return Ok(AckOutcome::Gone);
            };

            let next = match record.status.apply(kind) {
                Transition::Advance(next) => next,
                Transition::AlreadyApplied => {
                    debug!(%message_id, recipient, status = ?record.status, "duplicate ack");
                    return Ok(AckOutcome::AlreadyApplied(record.status));
                },
                Transition::Inconsistent { current, requested } => {
                    warn!(%message_id, recipient, ?current, ?requested, "inconsistent ack discarded");
                    return Ok(AckOutcome::Inconsistent { current, requested });
                },
            };

            let updated = record.with_status(next, self.env.now());
            if !self.swap(&record, &updated)? {
                debug!(%message_id, recipient, "record changed under ack, re-reading");
                continue;
            }
            info!(%message_id, recipient, status = ?next, "status advanced");

            match next {
                DeliveryStatus::Delivered => {
                    let delay = message.expires_at().saturating_duration_since(self.env.now());
                    self.publish_or_log(RedeliveryEvent::Expire { message_id }, Some(delay)).await;
                },
                DeliveryStatus::Read => self.cleanup_if_done(message_id).await?,
                _ => {},
            }
            return Ok(AckOutcome::Applied(next));
        }
    }

    /// Unwrap the content key through `recipient`'s session and open the
    /// body.
    ///
    /// Each message can be opened once per recipient; the message key is
    /// destroyed on first use.
    pub async fn open(&self, message_id: MessageId, recipient: UserId) -> Result<Vec<u8>, DeliveryError> {
        let message = self.store.load_message(message_id)?.ok_or(DeliveryError::UnknownMessage(message_id))?;
        let wrapped = message
            .wrapped_keys
            .get(&recipient)
            .ok_or(DeliveryError::NotARecipient { message_id, user: recipient })?;
        let conversation = message.conversation;
        let not_participant = DeliveryError::NotAParticipant { user: recipient, conversation };

        let lock = self.sessions.get(conversation).ok_or(DeliveryError::UnknownConversation(conversation))?;
        let mut state = lock.lock().await;
        let unwrapped = match &mut state.context {
            CryptoContext::Direct(direct) => {
                let ratchet: RatchetMessage = wire::decode(wrapped)?;
                let session = direct.sessions.get_mut(&recipient).ok_or(not_participant)?;
                session.decrypt(&ratchet).map_err(CryptoError::from)
            },
            CryptoContext::Group(group) => {
                let sealed_key: GroupMessage = wire::decode(wrapped)?;
                let keys = group.sessions.get_mut(&recipient).ok_or(not_participant)?;
                let local = keys.current.key_epoch();
                match keys.for_epoch_mut(sealed_key.key_epoch) {
                    Some(session) => session.decrypt(&sealed_key).map_err(CryptoError::from),
                    None => Err(CryptoError::from(SenderKeyError::EpochMismatch {
                        local,
                        message: sealed_key.key_epoch,
                    })),
                }
            },
        };
        drop(state);

        let key_bytes = unwrapped.inspect_err(|err| {
            warn!(%message_id, recipient, %err, "content key unwrap failed");
        })?;
        let content_key = ContentKey::from_slice(&key_bytes).map_err(CryptoError::from)?;
        let sealed: SealedContent = wire::decode(&message.body)?;
        let plaintext = content::open(&sealed, &content_key).map_err(CryptoError::from).inspect_err(|err| {
            warn!(%message_id, recipient, %err, "message body failed authentication");
        })?;

        debug!(%message_id, recipient, "message opened");
        Ok(plaintext)
    }

    /// True status of one record.
    pub fn delivery_status(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryStatus>, DeliveryError> {
        Ok(self.store.load_record(message_id, recipient)?.map(|record| record.status))
    }

    /// Status the sender is shown for one record. A send suppressed by a
    /// block reads as sent until its TTL passes.
    pub fn reported_status(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> Result<Option<ReportedStatus>, DeliveryError> {
        if self.suppressed.contains(message_id, recipient) {
            return Ok(Some(ReportedStatus::Sent));
        }
        Ok(self.delivery_status(message_id, recipient)?.map(DeliveryStatus::reported))
    }

    /// True status of every record of a message, by recipient.
    pub fn group_status(
        &self,
        message_id: MessageId,
    ) -> Result<HashMap<UserId, DeliveryStatus>, DeliveryError> {
        let records = self.store.load_records(message_id)?;
        Ok(records.into_iter().map(|record| (record.recipient, record.status)).collect())
    }

    /// Current master-key epoch of a group.
    pub async fn group_epoch(&self, group_id: u128) -> Result<u64, DeliveryError> {
        let id = ConversationId::group(group_id);
        let lock = self.sessions.get(id).ok_or(DeliveryError::UnknownConversation(id))?;
        let state = lock.lock().await;
        match &state.context {
            CryptoContext::Group(group) => Ok(group.distribution.key_epoch),
            CryptoContext::Direct(_) => Err(DeliveryError::UnknownConversation(id)),
        }
    }

    /// React to a presence change. Coming online re-routes everything still
    /// pending for the user, bypassing any timed backoff.
    ///
    /// Returns how many messages were pushed.
    pub async fn on_presence_change(&self, user: UserId, online: bool) -> Result<usize, DeliveryError> {
        if !online {
            debug!(user, "user went offline");
            return Ok(0);
        }
        self.redeliver_pending(user).await
    }

    /// Finish a send that every recipient blocked: persist nothing, purge
    /// any uploaded media and hand back a receipt shaped like a real one.
    pub(crate) async fn suppress(
        &self,
        outgoing: &OutgoingMessage,
        recipients: Vec<UserId>,
        sequence: u64,
    ) -> SendReceipt {
        let message_id = MessageId(self.env.random_u128());
        let ttl = outgoing.ttl.unwrap_or(self.config.default_ttl);
        let expires_at = self.env.now().saturating_add(ttl);
        debug!(%message_id, conversation = %outgoing.conversation, "sender blocked, nothing persisted");

        self.suppressed.record(message_id, recipients, expires_at);
        if let Some(media) = &outgoing.media {
            self.purge_media(media).await;
        }
        SendReceipt { message_id, sequence: Some(sequence), reported: ReportedStatus::Sent }
    }

    pub(crate) fn random_nonce(&self) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        self.env.random_bytes(&mut nonce);
        nonce
    }
}
