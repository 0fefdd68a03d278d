use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire message handed to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Id of the aggregate the message is about
    pub correlation_id: Uuid,
    /// Consumers drop messages whose key they have already seen
    pub idempotency_key: String,
    pub topic: String,
    pub message_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unavailable(String),

    #[error("broker rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("message could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Port for the message broker
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// One publish attempt. `Ok(false)` means the broker declined the message.
    async fn publish(&self, message: &BrokerMessage) -> Result<bool, BrokerError>;
}
