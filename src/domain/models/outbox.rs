use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    download_task::DownloadTaskStatus, events::DomainEvent,
    external_download::ExternalDownloadStatus,
};
use crate::domain::{
    errors::{OutboxError, OutboxResult},
    value_objects::{
        DownloadId, DownloadTaskId, HttpUrl, IdempotencyKey, ObjectLocation, OutboxId, SessionId,
    },
};

/// Delivery status of an outbox row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five kinds of notification the outbox carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxKind {
    DownloadRegistration,
    Webhook,
    QueueDispatch,
    Callback,
    PipelineTrigger,
}

impl OutboxKind {
    pub const ALL: [OutboxKind; 5] = [
        OutboxKind::DownloadRegistration,
        OutboxKind::Webhook,
        OutboxKind::QueueDispatch,
        OutboxKind::Callback,
        OutboxKind::PipelineTrigger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::DownloadRegistration => "DOWNLOAD_REGISTRATION",
            OutboxKind::Webhook => "WEBHOOK",
            OutboxKind::QueueDispatch => "QUEUE_DISPATCH",
            OutboxKind::Callback => "CALLBACK",
            OutboxKind::PipelineTrigger => "PIPELINE_TRIGGER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Webhooks and callbacks are POSTed to a URL; everything else goes to the broker
    pub fn is_http(&self) -> bool {
        matches!(self, OutboxKind::Webhook | OutboxKind::Callback)
    }

    /// Broker topic for broker-routed kinds
    pub fn topic(&self) -> &'static str {
        match self {
            OutboxKind::DownloadRegistration => "download.registration",
            OutboxKind::QueueDispatch => "download.queue",
            OutboxKind::PipelineTrigger => "pipeline.trigger",
            OutboxKind::Webhook => "download.webhook",
            OutboxKind::Callback => "download.callback",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            OutboxKind::DownloadRegistration => "download-registration",
            OutboxKind::Webhook => "webhook",
            OutboxKind::QueueDispatch => "queue-dispatch",
            OutboxKind::Callback => "callback",
            OutboxKind::PipelineTrigger => "pipeline-trigger",
        }
    }
}

impl std::fmt::Display for OutboxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of an outbox row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxPayload {
    DownloadRegistration {
        download_id: DownloadId,
        source_url: HttpUrl,
        destination: ObjectLocation,
        tags: Vec<String>,
    },
    Webhook {
        download_id: DownloadId,
        webhook_url: HttpUrl,
        status: ExternalDownloadStatus,
        location: Option<ObjectLocation>,
        etag: Option<String>,
        error: Option<String>,
    },
    QueueDispatch {
        task_id: DownloadTaskId,
        download_id: DownloadId,
        attempt: u32,
    },
    Callback {
        task_id: DownloadTaskId,
        download_id: DownloadId,
        callback_url: HttpUrl,
        status: DownloadTaskStatus,
        location: Option<ObjectLocation>,
        etag: Option<String>,
        error: Option<String>,
    },
    PipelineTrigger {
        session_id: SessionId,
        location: ObjectLocation,
        etag: String,
        size: u64,
        content_type: String,
    },
}

impl OutboxPayload {
    pub fn kind(&self) -> OutboxKind {
        match self {
            OutboxPayload::DownloadRegistration { .. } => OutboxKind::DownloadRegistration,
            OutboxPayload::Webhook { .. } => OutboxKind::Webhook,
            OutboxPayload::QueueDispatch { .. } => OutboxKind::QueueDispatch,
            OutboxPayload::Callback { .. } => OutboxKind::Callback,
            OutboxPayload::PipelineTrigger { .. } => OutboxKind::PipelineTrigger,
        }
    }

    /// Id of the aggregate whose transaction wrote the row
    pub fn owner_key(&self) -> Uuid {
        match self {
            OutboxPayload::DownloadRegistration { download_id, .. }
            | OutboxPayload::Webhook { download_id, .. } => download_id.as_uuid(),
            OutboxPayload::QueueDispatch { task_id, .. }
            | OutboxPayload::Callback { task_id, .. } => task_id.as_uuid(),
            OutboxPayload::PipelineTrigger { session_id, .. } => session_id.as_uuid(),
        }
    }

    /// Deterministic per logical notification, so a replayed write collides
    /// on the unique index instead of producing a second row
    pub fn idempotency_key(&self) -> IdempotencyKey {
        let prefix = self.kind().key_prefix();
        match self {
            OutboxPayload::QueueDispatch {
                task_id, attempt, ..
            } => IdempotencyKey::derived(prefix, format!("{}:{}", task_id, attempt)),
            _ => IdempotencyKey::derived(prefix, self.owner_key()),
        }
    }

    /// Target URL for HTTP-routed kinds
    pub fn http_target(&self) -> Option<&HttpUrl> {
        match self {
            OutboxPayload::Webhook { webhook_url, .. } => Some(webhook_url),
            OutboxPayload::Callback { callback_url, .. } => Some(callback_url),
            _ => None,
        }
    }

    /// The notification a domain event calls for, if any
    pub fn from_event(event: &DomainEvent) -> Option<Self> {
        match event {
            DomainEvent::UploadCompleted {
                session_id,
                location,
                etag,
                size,
                content_type,
                ..
            } => Some(OutboxPayload::PipelineTrigger {
                session_id: *session_id,
                location: location.clone(),
                etag: etag.clone(),
                size: *size,
                content_type: content_type.clone(),
            }),
            DomainEvent::UploadSessionExpired { .. } => None,
            DomainEvent::ExternalDownloadRegistered {
                download_id,
                source_url,
                destination,
                tags,
                ..
            } => Some(OutboxPayload::DownloadRegistration {
                download_id: *download_id,
                source_url: source_url.clone(),
                destination: destination.clone(),
                tags: tags.clone(),
            }),
            DomainEvent::ExternalDownloadFinished {
                download_id,
                status,
                webhook_url,
                location,
                etag,
                error,
                ..
            } => webhook_url.as_ref().map(|url| OutboxPayload::Webhook {
                download_id: *download_id,
                webhook_url: url.clone(),
                status: *status,
                location: location.clone(),
                etag: etag.clone(),
                error: error.clone(),
            }),
            DomainEvent::DownloadTaskRequeued {
                task_id,
                download_id,
                attempt,
                ..
            } => Some(OutboxPayload::QueueDispatch {
                task_id: *task_id,
                download_id: *download_id,
                attempt: *attempt,
            }),
            DomainEvent::DownloadTaskCompleted {
                task_id,
                download_id,
                location,
                etag,
                callback_url,
                ..
            } => callback_url.as_ref().map(|url| OutboxPayload::Callback {
                task_id: *task_id,
                download_id: *download_id,
                callback_url: url.clone(),
                status: DownloadTaskStatus::Completed,
                location: Some(location.clone()),
                etag: Some(etag.clone()),
                error: None,
            }),
            DomainEvent::DownloadTaskExhausted {
                task_id,
                download_id,
                last_error,
                callback_url,
                ..
            } => callback_url.as_ref().map(|url| OutboxPayload::Callback {
                task_id: *task_id,
                download_id: *download_id,
                callback_url: url.clone(),
                status: DownloadTaskStatus::Failed,
                location: None,
                etag: None,
                error: Some(last_error.clone()),
            }),
        }
    }
}

/// Durable intent to notify another system.
///
/// Created in the same transaction as the owning aggregate's write; only the
/// publish outcome is applied later, by the listener or the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    id: OutboxId,
    owner_key: Uuid,
    idempotency_key: IdempotencyKey,
    payload: OutboxPayload,
    status: OutboxStatus,
    retry_count: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl OutboxRecord {
    pub fn create(id: OutboxId, payload: OutboxPayload, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_key: payload.owner_key(),
            idempotency_key: payload.idempotency_key(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            version: 0,
        }
    }

    /// Row for the notification `event` calls for, if it calls for one
    pub fn for_event(id: OutboxId, event: &DomainEvent, now: DateTime<Utc>) -> Option<Self> {
        OutboxPayload::from_event(event).map(|payload| Self::create(id, payload, now))
    }

    /// PENDING | FAILED -> PUBLISHED. `processed_at` is written here and nowhere else.
    pub fn mark_published(&mut self, now: DateTime<Utc>) -> OutboxResult<()> {
        if self.status == OutboxStatus::Published {
            return Err(self.illegal("mark published"));
        }
        self.status = OutboxStatus::Published;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// PENDING | FAILED -> FAILED with one more recorded attempt
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> OutboxResult<()> {
        if self.status == OutboxStatus::Published {
            return Err(self.illegal("mark failed"));
        }
        self.status = OutboxStatus::Failed;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
        Ok(())
    }

    fn illegal(&self, operation: &'static str) -> OutboxError {
        OutboxError::IllegalState {
            outbox_id: self.id,
            status: self.status,
            operation,
        }
    }

    pub fn id(&self) -> OutboxId {
        self.id
    }

    pub fn owner_key(&self) -> Uuid {
        self.owner_key
    }

    pub fn kind(&self) -> OutboxKind {
        self.payload.kind()
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn payload(&self) -> &OutboxPayload {
        &self.payload
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Called by repositories after a successful write
    pub fn mark_persisted(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn registration() -> OutboxRecord {
        let download_id = DownloadId::from_uuid(Uuid::new_v4());
        OutboxRecord::create(
            OutboxId::from_uuid(Uuid::new_v4()),
            OutboxPayload::DownloadRegistration {
                download_id,
                source_url: HttpUrl::parse("sourceUrl", "https://x/a.jpg").unwrap(),
                destination: ObjectLocation::parse("downloads", "x/a.jpg").unwrap(),
                tags: vec!["image".to_string()],
            },
            now(),
        )
    }

    #[test]
    fn test_new_row_is_pending() {
        let row = registration();
        assert_eq!(row.status(), OutboxStatus::Pending);
        assert_eq!(row.retry_count(), 0);
        assert!(row.processed_at().is_none());
        assert_eq!(row.kind(), OutboxKind::DownloadRegistration);
        assert!(row
            .idempotency_key()
            .as_str()
            .starts_with("download-registration:"));
    }

    #[test]
    fn test_mark_published_sets_processed_at_once() {
        let mut row = registration();
        row.mark_published(now()).unwrap();
        assert_eq!(row.processed_at(), Some(now()));

        let later = now() + Duration::minutes(5);
        assert!(row.mark_published(later).is_err());
        assert_eq!(row.processed_at(), Some(now()));
        assert!(row.mark_failed("late", later).is_err());
        assert_eq!(row.retry_count(), 0);
    }

    #[test]
    fn test_mark_failed_counts_attempts_without_processed_at() {
        let mut row = registration();
        row.mark_failed("broker nack", now()).unwrap();
        row.mark_failed("timeout", now()).unwrap();

        assert_eq!(row.status(), OutboxStatus::Failed);
        assert_eq!(row.retry_count(), 2);
        assert_eq!(row.last_error(), Some("timeout"));
        assert!(row.processed_at().is_none());

        row.mark_published(now()).unwrap();
        assert_eq!(row.retry_count(), 2);
        assert!(row.processed_at().is_some());
    }

    #[test]
    fn test_queue_dispatch_keys_differ_per_attempt() {
        let task_id = DownloadTaskId::from_uuid(Uuid::new_v4());
        let download_id = DownloadId::from_uuid(task_id.as_uuid());
        let first = OutboxPayload::QueueDispatch {
            task_id,
            download_id,
            attempt: 1,
        };
        let second = OutboxPayload::QueueDispatch {
            task_id,
            download_id,
            attempt: 2,
        };
        assert_eq!(first.owner_key(), second.owner_key());
        assert_ne!(first.idempotency_key(), second.idempotency_key());
    }

    #[test]
    fn test_finished_download_without_webhook_needs_no_row() {
        let event = DomainEvent::ExternalDownloadFinished {
            download_id: DownloadId::from_uuid(Uuid::new_v4()),
            status: ExternalDownloadStatus::Completed,
            webhook_url: None,
            location: None,
            etag: None,
            error: None,
            occurred_at: now(),
        };
        assert!(OutboxPayload::from_event(&event).is_none());
    }

    #[test]
    fn test_routing() {
        assert!(OutboxKind::Webhook.is_http());
        assert!(OutboxKind::Callback.is_http());
        assert!(!OutboxKind::PipelineTrigger.is_http());
        assert_eq!(OutboxKind::parse("QUEUE_DISPATCH"), Some(OutboxKind::QueueDispatch));
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let row = registration();
        let json = serde_json::to_value(row.payload()).unwrap();
        assert_eq!(json["type"], "download_registration");
        assert_eq!(json["source_url"], "https://x/a.jpg");
    }
}
