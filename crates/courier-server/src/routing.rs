//! Routing one delivery record and recording the outcome.
//!
//! Presence is looked up fresh for every attempt. The outcome is written
//! back with compare-and-set; losing the race means another handler already
//! moved the record and this attempt stops there.

use std::time::Duration;

use courier_core::{
    DeliveryRecord, DeliveryStatus, Environment, Message, PresenceInfo, RedeliveryEvent,
    RedeliveryMode, Route, RouteDecision, RouteOutcome, RoutingMode, Transition, UserId, decide,
};
use tracing::{debug, error, info, warn};

use crate::{
    broker::BrokerError,
    error::DeliveryError,
    service::Courier,
    storage::{MessageStore, StorageError},
    transport::PushEnvelope,
};

impl<E: Environment, S: MessageStore> Courier<E, S> {
    pub(crate) async fn lookup(&self, user: UserId) -> Result<PresenceInfo, DeliveryError> {
        self.collaborators.presence.get(user).await.map_err(|err| {
            error!(user, %err, "presence lookup failed");
            DeliveryError::from(err)
        })
    }

    /// Run the routing decision for one record and act on it.
    pub(crate) async fn route_record(
        &self,
        message: &Message,
        record: &DeliveryRecord,
        mode: RoutingMode,
    ) -> Result<RouteOutcome, DeliveryError> {
        let presence = self.lookup(record.recipient).await?;
        let decision = decide(message.sender, &presence, mode);
        debug!(message_id = %message.id, recipient = record.recipient, ?mode, ?decision, "routing decision");

        Ok(match decision {
            RouteDecision::Blocked => RouteOutcome::Dropped,
            RouteDecision::Offline => RouteOutcome::Queued,
            RouteDecision::Direct(route) => self.push(route, message, record.recipient).await,
        })
    }

    pub(crate) async fn push(&self, route: Route, message: &Message, recipient: UserId) -> RouteOutcome {
        let envelope = PushEnvelope {
            message_id: message.id,
            conversation: message.conversation,
            sender: message.sender,
            sequence: message.sequence,
            body: message.body.clone(),
            wrapped_key: message.wrapped_keys.get(&recipient).cloned().unwrap_or_default(),
        };

        match self.collaborators.transport.push(route, envelope).await {
            Ok(()) => {
                debug!(message_id = %message.id, recipient, "pushed");
                RouteOutcome::Pushed(route)
            },
            Err(err) => {
                debug!(message_id = %message.id, recipient, %err, "push failed");
                RouteOutcome::Failed(route)
            },
        }
    }

    /// Record the outcome of attempt number `attempt` (zero for a first or
    /// presence-triggered push).
    ///
    /// A failed push schedules the next timed retry while the budget allows,
    /// then falls back to waiting for presence.
    pub(crate) async fn settle(
        &self,
        record: &DeliveryRecord,
        outcome: RouteOutcome,
        attempt: u32,
    ) -> Result<(), DeliveryError> {
        let message_id = record.message_id;
        let recipient = record.recipient;
        let now = self.env.now();

        match outcome {
            RouteOutcome::Dropped => {
                let Transition::Advance(next) = record.status.drop_blocked() else {
                    return Ok(());
                };
                if self.swap(record, &record.with_status(next, now))? {
                    info!(%message_id, recipient, "queued message suppressed by block");
                    self.cleanup_if_done(message_id).await?;
                }
            },
            RouteOutcome::Pushed(_) => {
                let next = record.with_mode(RedeliveryMode::Idle, attempt, now);
                if !self.swap(record, &next)? {
                    debug!(%message_id, recipient, "record moved during push");
                }
            },
            RouteOutcome::Queued => {
                let next = record.with_mode(RedeliveryMode::AwaitPresence, attempt, now);
                if !self.swap(record, &next)? {
                    debug!(%message_id, recipient, "record moved while queueing");
                }
            },
            RouteOutcome::Failed(_) => {
                let next_attempt = attempt + 1;
                if !self.config.retry.allows(next_attempt) {
                    let next = record.with_mode(RedeliveryMode::AwaitPresence, attempt, now);
                    if self.swap(record, &next)? {
                        info!(%message_id, recipient, attempt, "retries exhausted, waiting for presence");
                    }
                    return Ok(());
                }

                let scheduled = record.with_mode(RedeliveryMode::Timed, next_attempt, now);
                if !self.swap(record, &scheduled)? {
                    debug!(%message_id, recipient, "record moved before retry was scheduled");
                    return Ok(());
                }

                let delay = self.config.retry.backoff(next_attempt, self.env.random_u64());
                let event =
                    RedeliveryEvent::TimedRetry { message_id, recipient, attempt: next_attempt };
                if self.publish_with_retry(event, Some(delay)).await.is_err() {
                    // Without a timer the record can only come back through presence.
                    let fallback =
                        scheduled.with_mode(RedeliveryMode::AwaitPresence, next_attempt, now);
                    self.swap(&scheduled, &fallback)?;
                    return Ok(());
                }
                debug!(%message_id, recipient, attempt = next_attempt, ?delay, "retry scheduled");
            },
        }
        Ok(())
    }

    /// Re-route every pending record of `user` in presence-triggered mode.
    pub(crate) async fn redeliver_pending(&self, user: UserId) -> Result<usize, DeliveryError> {
        let pending = self.store.records_for(user, DeliveryStatus::Pending)?;
        let now = self.env.now();
        let mut pushed = 0;

        for record in pending {
            let Some(message) = self.store.load_message(record.message_id)? else {
                continue;
            };
            if message.is_expired(now) {
                continue;
            }

            let outcome = self.route_record(&message, &record, RoutingMode::PresenceTriggered).await?;
            match outcome {
                RouteOutcome::Queued => continue,
                RouteOutcome::Pushed(_) => pushed += 1,
                RouteOutcome::Dropped | RouteOutcome::Failed(_) => {},
            }
            self.settle(&record, outcome, 0).await?;
        }

        if pushed > 0 {
            info!(user, pushed, "pending messages redelivered on presence");
        }
        Ok(pushed)
    }

    /// Compare-and-set where a vanished record counts as a lost race.
    pub(crate) fn swap(
        &self,
        expected: &DeliveryRecord,
        next: &DeliveryRecord,
    ) -> Result<bool, DeliveryError> {
        match self.store.compare_and_set(expected, next) {
            Ok(swapped) => Ok(swapped),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => {
                error!(message_id = %expected.message_id, recipient = expected.recipient, %err, "record update failed");
                Err(err.into())
            },
        }
    }

    pub(crate) fn insert_with_retry(
        &self,
        message: &Message,
        records: &[DeliveryRecord],
    ) -> Result<(), DeliveryError> {
        let mut retries = 0;
        loop {
            match self.store.insert_message(message, records) {
                Ok(()) => return Ok(()),
                // An earlier attempt landed before its error was reported.
                Err(StorageError::Conflict(_)) if retries > 0 => return Ok(()),
                Err(err @ StorageError::Io(_)) if retries < self.config.local_retries => {
                    debug!(message_id = %message.id, %err, retries, "store write failed, retrying");
                    retries += 1;
                },
                Err(err) => {
                    error!(message_id = %message.id, %err, "message could not be persisted");
                    return Err(err.into());
                },
            }
        }
    }

    pub(crate) async fn publish_with_retry(
        &self,
        event: RedeliveryEvent,
        delay: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut retries = 0;
        loop {
            match self.collaborators.broker.publish(event.clone(), delay).await {
                Ok(()) => return Ok(()),
                Err(err) if retries < self.config.local_retries => {
                    debug!(?event, %err, retries, "publish failed, retrying");
                    retries += 1;
                },
                Err(err) => {
                    error!(?event, %err, "event could not be published");
                    return Err(err);
                },
            }
        }
    }

    /// Publish where losing the event only delays work that presence or the
    /// TTL sweep will pick up anyway.
    pub(crate) async fn publish_or_log(&self, event: RedeliveryEvent, delay: Option<Duration>) {
        if let Err(err) = self.publish_with_retry(event, delay).await {
            warn!(%err, "continuing without event");
        }
    }
}
