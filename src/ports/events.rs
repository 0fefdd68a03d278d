use async_trait::async_trait;

use crate::domain::models::DomainEvent;

/// Consumer of committed domain events.
///
/// Listeners report their own failures through logs and state transitions;
/// nothing they do may fail the write that produced the event.
#[async_trait]
pub trait DomainEventListener: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn on_event(&self, event: &DomainEvent);
}
