use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{message_manager::OutboxMessageManager, outbox_listener::panic_message};
use crate::{
    domain::{
        errors::OutboxResult,
        models::{OutboxRecord, OutboxRetryPolicy, OutboxStatus},
        value_objects::OutboxId,
    },
    ports::{repositories::OutboxRepository, system::Clock},
};

/// Outcome of one sweep pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub published: usize,
    pub failed: usize,
    /// Rows another worker updated first
    pub conflicts: usize,
    /// Rows whose outcome could not be stored; they stay due
    pub errors: usize,
    /// Rows that used their last attempt in this pass
    pub exhausted: Vec<OutboxId>,
}

/// Re-publishes PENDING and FAILED rows once their backoff has elapsed
pub struct OutboxSweeper {
    outbox: Arc<dyn OutboxRepository>,
    manager: Arc<OutboxMessageManager>,
    clock: Arc<dyn Clock>,
    policy: OutboxRetryPolicy,
    batch_size: usize,
}

impl OutboxSweeper {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        manager: Arc<OutboxMessageManager>,
        clock: Arc<dyn Clock>,
        policy: OutboxRetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            outbox,
            manager,
            clock,
            policy,
            batch_size,
        }
    }

    pub fn policy(&self) -> &OutboxRetryPolicy {
        &self.policy
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> OutboxResult<SweepReport> {
        let now = self.clock.now();
        let due = self
            .outbox
            .find_due(&self.policy, now, self.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for mut row in due {
            report.attempted += 1;
            if let Err(e) = self.attempt(&mut row, &mut report).await {
                warn!(
                    outbox_id = %row.id(),
                    kind = %row.kind(),
                    error = %e,
                    "Could not record outbox attempt, leaving row for the next sweep"
                );
                report.errors += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                published = report.published,
                failed = report.failed,
                conflicts = report.conflicts,
                errors = report.errors,
                exhausted = report.exhausted.len(),
                "Outbox sweep finished"
            );
        }
        Ok(report)
    }

    async fn attempt(&self, row: &mut OutboxRecord, report: &mut SweepReport) -> OutboxResult<()> {
        let attempt = AssertUnwindSafe(self.manager.publish_record(row))
            .catch_unwind()
            .await;
        let now = self.clock.now();
        match attempt {
            Ok(Ok(true)) => row.mark_published(now)?,
            Ok(Ok(false)) => row.mark_failed("message declined by broker", now)?,
            Ok(Err(e)) => row.mark_failed(e.to_string(), now)?,
            Err(panic) => {
                row.mark_failed(format!("publish panicked: {}", panic_message(&*panic)), now)?
            }
        }

        match self.outbox.update(row).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(outbox_id = %row.id(), "Row changed under the sweep, skipping");
                report.conflicts += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if row.status() == OutboxStatus::Published {
            report.published += 1;
            return Ok(());
        }

        report.failed += 1;
        if self.policy.is_exhausted(row) {
            error!(
                outbox_id = %row.id(),
                kind = %row.kind(),
                owner_key = %row.owner_key(),
                retry_count = row.retry_count(),
                last_error = row.last_error().unwrap_or_default(),
                "Outbox row exhausted its retry budget"
            );
            report.exhausted.push(row.id());
        } else {
            warn!(
                outbox_id = %row.id(),
                kind = %row.kind(),
                retry_count = row.retry_count(),
                "Outbox re-publish failed"
            );
        }
        Ok(())
    }

    /// Rows past their budget, for operator inspection
    pub async fn exhausted(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        Ok(self.outbox.find_exhausted(&self.policy, limit).await?)
    }
}
