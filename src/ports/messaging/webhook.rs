use async_trait::async_trait;

use crate::domain::value_objects::HttpUrl;

/// A notification POSTed to a subscriber URL
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: HttpUrl,
    /// Sent as the `Idempotency-Key` header
    pub idempotency_key: String,
    pub event_type: String,
    pub body: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook delivery to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("webhook endpoint {url} answered {status}")]
    Status { url: String, status: u16 },
}

/// Port for webhook and callback delivery.
///
/// Delivery is at-least-once; subscribers deduplicate on the idempotency key.
#[async_trait]
pub trait WebhookSender: Send + Sync + 'static {
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError>;
}
