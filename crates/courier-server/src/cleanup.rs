//! Ephemeral cleanup.
//!
//! A message row is deleted once every recipient has read it (or had it
//! suppressed), or once its TTL passes. Deleting an absent row is a no-op.
//! Media sub-deletes (blob, thumbnail, cache entry) are attempted
//! independently; each failure is queued for retry on its own and never
//! blocks the row delete or the other parts.

use courier_core::{Environment, MediaPart, MediaRef, MessageId, RedeliveryEvent};
use tracing::{debug, info, warn};

use crate::{blob::BlobError, error::DeliveryError, service::Courier, storage::MessageStore};

/// What a purge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Whether this call removed the row; `false` if it was already gone
    pub removed: bool,
    /// Media parts whose delete failed and was queued for retry
    pub media_failures: Vec<MediaPart>,
}

impl<E: Environment, S: MessageStore> Courier<E, S> {
    /// Delete a message and its media. Idempotent.
    pub async fn purge(&self, message_id: MessageId) -> Result<PurgeReport, DeliveryError> {
        let message = self.store.load_message(message_id)?;
        let removed = self.store.delete_message(message_id)?;
        if !removed {
            debug!(%message_id, "message already purged");
            return Ok(PurgeReport { removed, media_failures: Vec::new() });
        }

        info!(%message_id, "message purged");
        let media_failures = match message.and_then(|message| message.media) {
            Some(media) => self.purge_media(&media).await,
            None => Vec::new(),
        };
        Ok(PurgeReport { removed, media_failures })
    }

    /// Delete every message past its TTL, whatever its delivery status.
    /// Suppressed sends past their TTL are forgotten as well.
    ///
    /// Returns how many rows this sweep removed.
    pub async fn sweep_expired(&self) -> Result<usize, DeliveryError> {
        let now = self.env.now();
        let forgotten = self.suppressed.sweep(now);
        if forgotten > 0 {
            debug!(forgotten, "expired suppressed sends forgotten");
        }

        let expired = self.store.expired(now)?;
        let mut removed = 0;
        for message_id in expired {
            if self.purge(message_id).await?.removed {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "expired messages swept");
        }
        Ok(removed)
    }

    /// Purge once no record can change any more.
    pub(crate) async fn cleanup_if_done(&self, message_id: MessageId) -> Result<(), DeliveryError> {
        let records = self.store.load_records(message_id)?;
        if records.is_empty() || !records.iter().all(|record| record.status.is_terminal()) {
            return Ok(());
        }
        self.purge(message_id).await.map(|_| ())
    }

    /// Best-effort delete of all media parts. Failures are queued as
    /// `MediaPurge` events and returned.
    pub(crate) async fn purge_media(&self, media: &MediaRef) -> Vec<MediaPart> {
        let mut parts = vec![(media.blob_key.clone(), MediaPart::Blob)];
        if let Some(thumbnail) = &media.thumbnail_key {
            parts.push((thumbnail.clone(), MediaPart::Thumbnail));
        }
        parts.push((media.blob_key.clone(), MediaPart::CacheEntry));

        let mut failures = Vec::new();
        for (key, part) in parts {
            if let Err(err) = self.delete_media_part(&key, part).await {
                warn!(%key, ?part, %err, "media delete failed, queued for retry");
                failures.push(part);
                let event = RedeliveryEvent::MediaPurge { key, part };
                self.publish_or_log(event, Some(self.config.retry.initial_backoff)).await;
            }
        }
        failures
    }

    pub(crate) async fn delete_media_part(&self, key: &str, part: MediaPart) -> Result<(), BlobError> {
        match part {
            MediaPart::Blob | MediaPart::Thumbnail => self.collaborators.blobs.delete(key).await,
            MediaPart::CacheEntry => self.collaborators.cache.invalidate(key).await,
        }
    }
}
