mod remote;
mod in_memory;

pub use remote::{HttpMessageBroker, HttpWebhookSender};
pub use in_memory::{InMemoryMessageBroker, RecordingWebhookSender};
