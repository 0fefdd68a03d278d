use std::sync::Arc;
use tracing::debug;

use crate::{
    domain::models::{DomainEvent, OutboxPayload, OutboxRecord},
    ports::messaging::{
        BrokerError, BrokerMessage, MessageBroker, WebhookError, WebhookRequest, WebhookSender,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event {0} carries no outbound message")]
    NoMessage(&'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("payload could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Turns outbox payloads into wire messages and makes exactly one delivery
/// attempt. Retrying is the outbox sweep's job.
pub struct OutboxMessageManager {
    broker: Arc<dyn MessageBroker>,
    webhooks: Arc<dyn WebhookSender>,
}

impl OutboxMessageManager {
    pub fn new(broker: Arc<dyn MessageBroker>, webhooks: Arc<dyn WebhookSender>) -> Self {
        Self { broker, webhooks }
    }

    /// Publish the message a freshly committed event calls for.
    /// `Ok(false)` means the broker declined it.
    pub async fn publish_from_event(&self, event: &DomainEvent) -> Result<bool, PublishError> {
        let payload =
            OutboxPayload::from_event(event).ok_or(PublishError::NoMessage(event.name()))?;
        self.publish(&payload).await
    }

    /// Re-publish a stored row
    pub async fn publish_record(&self, record: &OutboxRecord) -> Result<bool, PublishError> {
        self.publish(record.payload()).await
    }

    async fn publish(&self, payload: &OutboxPayload) -> Result<bool, PublishError> {
        let kind = payload.kind();
        let idempotency_key = payload.idempotency_key().to_string();
        let body = serde_json::to_value(payload)?;

        if let Some(url) = payload.http_target() {
            let request = WebhookRequest {
                url: url.clone(),
                idempotency_key,
                event_type: kind.topic().to_string(),
                body,
            };
            self.webhooks.send(&request).await?;
            debug!(kind = %kind, url = %url, "Delivered HTTP notification");
            return Ok(true);
        }

        let message = BrokerMessage {
            correlation_id: payload.owner_key(),
            idempotency_key,
            topic: kind.topic().to_string(),
            message_type: kind.as_str().to_string(),
            payload: body,
        };
        let accepted = self.broker.publish(&message).await?;
        debug!(kind = %kind, accepted, "Published broker message");
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::messaging::{InMemoryMessageBroker, RecordingWebhookSender};
    use crate::domain::{
        models::{DownloadTaskStatus, OutboxKind},
        value_objects::{DownloadId, DownloadTaskId, HttpUrl, ObjectLocation, SessionId},
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn manager() -> (
        OutboxMessageManager,
        Arc<InMemoryMessageBroker>,
        Arc<RecordingWebhookSender>,
    ) {
        let broker = Arc::new(InMemoryMessageBroker::new());
        let webhooks = Arc::new(RecordingWebhookSender::new());
        (
            OutboxMessageManager::new(broker.clone(), webhooks.clone()),
            broker,
            webhooks,
        )
    }

    fn completed_upload() -> DomainEvent {
        DomainEvent::UploadCompleted {
            session_id: SessionId::from_uuid(Uuid::new_v4()),
            kind: crate::domain::models::SessionKind::Single,
            location: ObjectLocation::parse("uploads", "a.png").unwrap(),
            etag: "etag".into(),
            size: 3,
            content_type: "image/png".into(),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broker_kind_goes_to_broker_with_dedup_key() {
        let (manager, broker, webhooks) = manager();
        assert!(manager.publish_from_event(&completed_upload()).await.unwrap());

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, OutboxKind::PipelineTrigger.topic());
        assert!(published[0].idempotency_key.starts_with("pipeline-trigger:"));
        assert!(webhooks.sent().is_empty());
    }

    #[tokio::test]
    async fn test_declined_publish_is_reported_once() {
        let (manager, broker, _) = manager();
        broker.set_accepting(false);
        assert!(!manager.publish_from_event(&completed_upload()).await.unwrap());
        assert_eq!(broker.attempts(), 1);
    }

    #[tokio::test]
    async fn test_callback_goes_over_http() {
        let (manager, broker, webhooks) = manager();
        let download_id = DownloadId::from_uuid(Uuid::new_v4());
        let event = DomainEvent::DownloadTaskExhausted {
            task_id: DownloadTaskId::for_download(download_id),
            download_id,
            retries: 3,
            last_error: "404".into(),
            callback_url: Some(HttpUrl::parse("callbackUrl", "https://cb.example.com/x").unwrap()),
            occurred_at: Utc::now(),
        };
        assert!(manager.publish_from_event(&event).await.unwrap());

        let sent = webhooks.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body["status"], serde_json::json!(DownloadTaskStatus::Failed));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_event_without_message_is_an_error() {
        let (manager, _, _) = manager();
        let event = DomainEvent::UploadSessionExpired {
            session_id: SessionId::from_uuid(Uuid::new_v4()),
            kind: crate::domain::models::SessionKind::Multipart,
            occurred_at: Utc::now(),
        };
        assert!(matches!(
            manager.publish_from_event(&event).await,
            Err(PublishError::NoMessage(_))
        ));
    }
}
