mod broker;
mod webhook;

pub use broker::{BrokerError, BrokerMessage, MessageBroker};
pub use webhook::{WebhookError, WebhookRequest, WebhookSender};
