use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::ports::messaging::{
    BrokerError, BrokerMessage, MessageBroker, WebhookError, WebhookRequest, WebhookSender,
};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

/// Broker reached over an HTTP ingest endpoint: `POST {endpoint}/{topic}`
#[derive(Clone)]
pub struct HttpMessageBroker {
    client: Client,
    endpoint: String,
}

impl HttpMessageBroker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BrokerError> {
        let client =
            http_client(timeout).map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MessageBroker for HttpMessageBroker {
    async fn publish(&self, message: &BrokerMessage) -> Result<bool, BrokerError> {
        let url = format!("{}/{}", self.endpoint, message.topic);
        let response = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, &message.idempotency_key)
            .json(message)
            .send()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        // 409: the broker has already seen this idempotency key
        if status == reqwest::StatusCode::CONFLICT {
            debug!(idempotency_key = %message.idempotency_key, "Broker reports duplicate message");
            return Ok(true);
        }
        if status.is_client_error() {
            return Ok(false);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BrokerError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Delivers webhooks and callbacks as JSON POSTs
#[derive(Clone)]
pub struct HttpWebhookSender {
    client: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = http_client(timeout).map_err(|e| WebhookError::Transport {
            url: String::new(),
            message: format!("Failed to create HTTP client for webhooks: {}", e),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(request.url.as_str())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header("X-Event-Type", &request.event_type)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| WebhookError::Transport {
                url: request.url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status {
                url: request.url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
