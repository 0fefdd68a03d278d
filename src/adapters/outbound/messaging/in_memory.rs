use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::ports::messaging::{
    BrokerError, BrokerMessage, MessageBroker, WebhookError, WebhookRequest, WebhookSender,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct BrokerState {
    published: Vec<BrokerMessage>,
    attempts: usize,
    declining: bool,
    unavailable: bool,
    panicking: bool,
    subscribers: Vec<mpsc::UnboundedSender<BrokerMessage>>,
}

/// In-process broker for development and tests.
///
/// Accepted messages are kept and forwarded to every subscriber.
#[derive(Default)]
pub struct InMemoryMessageBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryMessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every message accepted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BrokerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.state).subscribers.push(tx);
        rx
    }

    /// When false, publishes answer `Ok(false)`
    pub fn set_accepting(&self, accepting: bool) {
        lock(&self.state).declining = !accepting;
    }

    /// When true, publishes fail with `BrokerError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    /// When true, publishes panic
    pub fn set_panicking(&self, panicking: bool) {
        lock(&self.state).panicking = panicking;
    }

    pub fn published(&self) -> Vec<BrokerMessage> {
        lock(&self.state).published.clone()
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }
}

#[async_trait]
impl MessageBroker for InMemoryMessageBroker {
    async fn publish(&self, message: &BrokerMessage) -> Result<bool, BrokerError> {
        let mut state = lock(&self.state);
        state.attempts += 1;

        if state.panicking {
            drop(state);
            panic!("broker crashed while publishing {}", message.idempotency_key);
        }
        if state.unavailable {
            return Err(BrokerError::Unavailable("in-memory broker switched off".to_string()));
        }
        if state.declining {
            return Ok(false);
        }

        state.published.push(message.clone());
        state
            .subscribers
            .retain(|subscriber| subscriber.send(message.clone()).is_ok());
        Ok(true)
    }
}

#[derive(Default)]
struct WebhookState {
    sent: Vec<WebhookRequest>,
    failing_status: Option<u16>,
}

/// Webhook sender that records deliveries instead of making HTTP calls
#[derive(Default)]
pub struct RecordingWebhookSender {
    state: Mutex<WebhookState>,
}

impl RecordingWebhookSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every delivery with `status` until cleared
    pub fn set_failing(&self, status: Option<u16>) {
        lock(&self.state).failing_status = status;
    }

    pub fn sent(&self) -> Vec<WebhookRequest> {
        lock(&self.state).sent.clone()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhookSender {
    async fn send(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let mut state = lock(&self.state);
        if let Some(status) = state.failing_status {
            return Err(WebhookError::Status {
                url: request.url.to_string(),
                status,
            });
        }
        state.sent.push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(key: &str) -> BrokerMessage {
        BrokerMessage {
            correlation_id: Uuid::new_v4(),
            idempotency_key: key.to_string(),
            topic: "download.queue".to_string(),
            message_type: "QUEUE_DISPATCH".to_string(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_accepted_messages_only() {
        let broker = InMemoryMessageBroker::new();
        let mut rx = broker.subscribe();

        broker.set_accepting(false);
        assert!(!broker.publish(&message("a")).await.unwrap());
        broker.set_accepting(true);
        assert!(broker.publish(&message("b")).await.unwrap());

        assert_eq!(rx.recv().await.unwrap().idempotency_key, "b");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.attempts(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_broker_errors() {
        let broker = InMemoryMessageBroker::new();
        broker.set_unavailable(true);
        assert!(matches!(
            broker.publish(&message("a")).await,
            Err(BrokerError::Unavailable(_))
        ));
        assert!(broker.published().is_empty());
    }
}
