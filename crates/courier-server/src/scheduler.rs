//! Broker event handling.
//!
//! The broker delivers at least once, so every handler re-reads the record
//! and acts only if it is still in the state the event was published for.
//! A duplicate or stale event is a logged no-op.

use courier_core::{
    DeliveryRecord, DeliveryStatus, Environment, MediaPart, MessageId, RedeliveryEvent,
    RedeliveryMode, RouteOutcome, RoutingMode, UserId,
};
use tracing::{debug, warn};

use crate::{error::DeliveryError, service::Courier, storage::MessageStore};

impl<E: Environment, S: MessageStore> Courier<E, S> {
    /// Handle one broker event.
    ///
    /// An error means the event should be redelivered later.
    pub async fn handle_event(&self, event: RedeliveryEvent) -> Result<(), DeliveryError> {
        match event {
            RedeliveryEvent::TimedRetry { message_id, recipient, attempt } => {
                self.handle_timed_retry(message_id, recipient, attempt).await
            },
            RedeliveryEvent::OfflineDelivery { message_id, recipient }
            | RedeliveryEvent::GroupNotification { message_id, recipient } => {
                self.handle_offline(message_id, recipient).await
            },
            RedeliveryEvent::PresenceOnline { user } => self.redeliver_pending(user).await.map(|_| ()),
            RedeliveryEvent::Expire { message_id } => self.handle_expire(message_id).await,
            RedeliveryEvent::MediaPurge { key, part } => {
                self.retry_media_part(key, part).await;
                Ok(())
            },
        }
    }

    async fn handle_timed_retry(
        &self,
        message_id: MessageId,
        recipient: UserId,
        attempt: u32,
    ) -> Result<(), DeliveryError> {
        let Some(record) = self.live_record(message_id, recipient)? else {
            return Ok(());
        };
        if record.mode != RedeliveryMode::Timed || record.attempts != attempt {
            debug!(%message_id, recipient, attempt, stored = record.attempts, mode = ?record.mode, "stale retry");
            return Ok(());
        }
        let Some(message) = self.store.load_message(message_id)? else {
            return Ok(());
        };
        if message.is_expired(self.env.now()) {
            debug!(%message_id, recipient, "message expired, leaving it to the sweep");
            return Ok(());
        }

        let outcome = self.route_record(&message, &record, RoutingMode::Normal).await?;
        self.settle(&record, outcome, attempt).await
    }

    /// One-shot notification for a recipient that was offline at send time.
    /// If they are still offline the record keeps waiting for presence.
    async fn handle_offline(&self, message_id: MessageId, recipient: UserId) -> Result<(), DeliveryError> {
        let Some(record) = self.live_record(message_id, recipient)? else {
            return Ok(());
        };
        if record.mode != RedeliveryMode::AwaitPresence {
            debug!(%message_id, recipient, mode = ?record.mode, "offline notification already superseded");
            return Ok(());
        }
        let Some(message) = self.store.load_message(message_id)? else {
            return Ok(());
        };
        if message.is_expired(self.env.now()) {
            debug!(%message_id, recipient, "message expired, leaving it to the sweep");
            return Ok(());
        }

        match self.route_record(&message, &record, RoutingMode::Normal).await? {
            RouteOutcome::Queued => {
                debug!(%message_id, recipient, "recipient still offline");
                Ok(())
            },
            outcome => self.settle(&record, outcome, 0).await,
        }
    }

    async fn handle_expire(&self, message_id: MessageId) -> Result<(), DeliveryError> {
        let Some(message) = self.store.load_message(message_id)? else {
            debug!(%message_id, "expiry for purged message");
            return Ok(());
        };

        let now = self.env.now();
        if !message.is_expired(now) {
            let remaining = message.expires_at().saturating_duration_since(now);
            self.publish_with_retry(RedeliveryEvent::Expire { message_id }, Some(remaining)).await?;
            return Ok(());
        }
        self.purge(message_id).await.map(|_| ())
    }

    async fn retry_media_part(&self, key: String, part: MediaPart) {
        if let Err(err) = self.delete_media_part(&key, part).await {
            warn!(%key, ?part, %err, "media delete failed again");
            let event = RedeliveryEvent::MediaPurge { key, part };
            self.publish_or_log(event, Some(self.config.retry.initial_backoff)).await;
        }
    }

    /// Record that is still pending.
    fn live_record(
        &self,
        message_id: MessageId,
        recipient: UserId,
    ) -> Result<Option<DeliveryRecord>, DeliveryError> {
        let Some(record) = self.store.load_record(message_id, recipient)? else {
            debug!(%message_id, recipient, "record gone");
            return Ok(None);
        };
        if record.status != DeliveryStatus::Pending {
            debug!(%message_id, recipient, status = ?record.status, "record no longer pending");
            return Ok(None);
        }
        Ok(Some(record))
    }
}
