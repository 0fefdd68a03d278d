use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{
    download_recovery::DownloadRecoverySweeper, outbox_sweeper::OutboxSweeper,
    session_expiry_sweeper::SessionExpirySweeper,
};

/// Sweep intervals; each must be non-zero
#[derive(Debug, Clone, Copy)]
pub struct SweepIntervals {
    pub expiry: Duration,
    pub outbox: Duration,
    pub recovery: Duration,
}

/// Drives the periodic sweeps
pub struct Scheduler {
    expiry: Arc<SessionExpirySweeper>,
    outbox: Arc<OutboxSweeper>,
    recovery: Arc<DownloadRecoverySweeper>,
    intervals: SweepIntervals,
}

impl Scheduler {
    pub fn new(
        expiry: Arc<SessionExpirySweeper>,
        outbox: Arc<OutboxSweeper>,
        recovery: Arc<DownloadRecoverySweeper>,
        intervals: SweepIntervals,
    ) -> Self {
        Self {
            expiry,
            outbox,
            recovery,
            intervals,
        }
    }

    /// Run every sweep on its interval until `shutdown` resolves.
    /// A sweep in progress finishes before the loop exits.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut expiry_tick = ticker(self.intervals.expiry);
        let mut outbox_tick = ticker(self.intervals.outbox);
        let mut recovery_tick = ticker(self.intervals.recovery);
        tokio::pin!(shutdown);

        info!(
            expiry_interval_secs = self.intervals.expiry.as_secs(),
            outbox_interval_secs = self.intervals.outbox.as_secs(),
            recovery_interval_secs = self.intervals.recovery.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = expiry_tick.tick() => {
                    if let Err(e) = self.expiry.sweep().await {
                        warn!(error = %e, "Session expiry sweep failed");
                    }
                }
                _ = outbox_tick.tick() => {
                    if let Err(e) = self.outbox.sweep().await {
                        warn!(error = %e, "Outbox sweep failed");
                    }
                }
                _ = recovery_tick.tick() => {
                    if let Err(e) = self.recovery.sweep().await {
                        warn!(error = %e, "Download recovery sweep failed");
                    }
                }
            }
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}
