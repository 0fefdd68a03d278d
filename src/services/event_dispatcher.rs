use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

use crate::{domain::models::DomainEvent, ports::events::DomainEventListener};

/// In-process fan-out of committed domain events.
///
/// Services call `dispatch` only after the write that produced the events
/// has committed. Listeners run in registration order; a listener that
/// panics is logged and skipped so later listeners and events still run.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn DomainEventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners are registered after construction because some of them
    /// call services that themselves hold the dispatcher
    pub fn register(&self, listener: Arc<dyn DomainEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub async fn dispatch(&self, events: Vec<DomainEvent>) {
        if events.is_empty() {
            return;
        }

        let listeners: Vec<Arc<dyn DomainEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for event in &events {
            debug!(event = event.name(), "Dispatching domain event");
            for listener in &listeners {
                let outcome = AssertUnwindSafe(listener.on_event(event))
                    .catch_unwind()
                    .await;
                if outcome.is_err() {
                    error!(
                        listener = listener.name(),
                        event = event.name(),
                        "Event listener panicked"
                    );
                }
            }
        }
    }
}
