use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::message_manager::OutboxMessageManager;
use crate::{
    domain::models::{DomainEvent, OutboxPayload, OutboxStatus},
    ports::{events::DomainEventListener, repositories::OutboxRepository, system::Clock},
};

/// Gives every freshly committed outbox row its first delivery attempt.
///
/// Every outcome, including a panic inside the publish path, ends as a
/// PUBLISHED or FAILED transition on the row. Nothing is propagated.
pub struct OutboxPublishingListener {
    outbox: Arc<dyn OutboxRepository>,
    manager: Arc<OutboxMessageManager>,
    clock: Arc<dyn Clock>,
}

impl OutboxPublishingListener {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        manager: Arc<OutboxMessageManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            outbox,
            manager,
            clock,
        }
    }
}

#[async_trait]
impl DomainEventListener for OutboxPublishingListener {
    fn name(&self) -> &'static str {
        "outbox-publisher"
    }

    async fn on_event(&self, event: &DomainEvent) {
        let Some(payload) = OutboxPayload::from_event(event) else {
            return;
        };
        let owner_key = payload.owner_key();
        let kind = payload.kind();
        let key = payload.idempotency_key();

        let rows = match self.outbox.find_by_owner(owner_key, kind).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(owner_key = %owner_key, kind = %kind, error = %e, "Could not load outbox row, leaving it to the sweep");
                return;
            }
        };

        // Absent row: the owning write never committed. Publishing anyway could double-send.
        let Some(mut row) = rows.into_iter().find(|r| r.idempotency_key() == &key) else {
            warn!(owner_key = %owner_key, kind = %kind, idempotency_key = %key, "No outbox row for committed event");
            return;
        };
        if row.status() == OutboxStatus::Published {
            debug!(outbox_id = %row.id(), "Outbox row already published");
            return;
        }

        let attempt = AssertUnwindSafe(self.manager.publish_from_event(event))
            .catch_unwind()
            .await;
        let now = self.clock.now();
        let transition = match attempt {
            Ok(Ok(true)) => row.mark_published(now),
            Ok(Ok(false)) => row.mark_failed("message declined by broker", now),
            Ok(Err(e)) => row.mark_failed(e.to_string(), now),
            Err(panic) => row.mark_failed(format!("publish panicked: {}", panic_message(&*panic)), now),
        };
        if let Err(e) = transition {
            warn!(outbox_id = %row.id(), error = %e, "Outbox transition rejected");
            return;
        }

        match self.outbox.update(&mut row).await {
            Ok(()) if row.status() == OutboxStatus::Published => {
                info!(outbox_id = %row.id(), kind = %kind, "Outbox row published");
            }
            Ok(()) => {
                warn!(
                    outbox_id = %row.id(),
                    kind = %kind,
                    retry_count = row.retry_count(),
                    error = row.last_error().unwrap_or_default(),
                    "Outbox publish failed, sweep will retry"
                );
            }
            Err(e) if e.is_conflict() => {
                debug!(outbox_id = %row.id(), "Outcome already recorded by another worker");
            }
            Err(e) => {
                warn!(outbox_id = %row.id(), error = %e, "Could not record outbox outcome");
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
