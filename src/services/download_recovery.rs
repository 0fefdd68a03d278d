use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::download_worker::{DownloadTaskWorker, TaskRunOutcome};
use crate::{
    domain::{
        errors::{DownloadError, DownloadResult},
        models::{retry_policy::to_chrono, DownloadTaskStatus, ExternalDownload},
        value_objects::{DownloadId, DownloadTaskId},
    },
    ports::{
        repositories::{DownloadTaskRepository, ExternalDownloadRepository},
        services::ExternalDownloadService,
        system::Clock,
    },
};

/// Outcome of one recovery pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Claims of dead workers counted as failed attempts
    pub released_claims: usize,
    /// PROCESSING downloads moved on from their finished task
    pub finished: Vec<DownloadId>,
    /// PROCESSING downloads whose task was never created
    pub restarted: Vec<DownloadId>,
    pub errors: usize,
}

/// Picks up download work a crashed worker left behind
pub struct DownloadRecoverySweeper {
    worker: Arc<DownloadTaskWorker>,
    downloads: Arc<dyn ExternalDownloadRepository>,
    tasks: Arc<dyn DownloadTaskRepository>,
    service: Arc<dyn ExternalDownloadService>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    batch_size: usize,
}

impl DownloadRecoverySweeper {
    pub fn new(
        worker: Arc<DownloadTaskWorker>,
        downloads: Arc<dyn ExternalDownloadRepository>,
        tasks: Arc<dyn DownloadTaskRepository>,
        service: Arc<dyn ExternalDownloadService>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            worker,
            downloads,
            tasks,
            service,
            clock,
            stale_after,
            batch_size,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> DownloadResult<RecoveryReport> {
        let mut report = RecoveryReport {
            released_claims: self.worker.release_stale_claims(self.batch_size).await?,
            ..Default::default()
        };

        let cutoff = self.clock.now() - to_chrono(self.stale_after);
        let stuck = self.downloads.find_processing(cutoff, self.batch_size).await?;
        for download in stuck {
            let download_id = download.id();
            if let Err(e) = self.settle(&download, &mut report).await {
                warn!(download_id = %download_id, error = %e, "Could not recover download");
                report.errors += 1;
            }
        }

        if report.released_claims > 0 || !report.finished.is_empty() || !report.restarted.is_empty() {
            info!(
                released_claims = report.released_claims,
                finished = report.finished.len(),
                restarted = report.restarted.len(),
                errors = report.errors,
                "Download recovery finished"
            );
        }
        Ok(report)
    }

    /// Apply the outcome of the download's task, if it has one
    async fn settle(&self, download: &ExternalDownload, report: &mut RecoveryReport) -> DownloadResult<()> {
        let download_id = download.id();
        let task = self
            .tasks
            .find_by_id(DownloadTaskId::for_download(download_id))
            .await?;

        let result = match task {
            None => {
                let task = self.worker.ensure_task(download_id).await?;
                let outcome = self.worker.run(task.id()).await?;
                if !matches!(outcome, TaskRunOutcome::Skipped { .. }) {
                    report.restarted.push(download_id);
                }
                return Ok(());
            }
            Some(task) if task.status() == DownloadTaskStatus::Completed => match task.etag() {
                Some(etag) => self.service.complete_download(download_id, etag.to_string()).await,
                None => return Ok(()),
            },
            Some(task) if task.is_dead() => {
                let error = task.last_error().unwrap_or("download task failed").to_string();
                self.service.fail_download(download_id, error).await
            }
            Some(_) => return Ok(()),
        };

        match result {
            Ok(_) => {
                report.finished.push(download_id);
                Ok(())
            }
            Err(e @ DownloadError::IllegalState { .. }) => {
                debug!(download_id = %download_id, error = %e, "Download finished concurrently");
                Ok(())
            }
            Err(DownloadError::Repository(e)) if e.is_conflict() => {
                debug!(download_id = %download_id, "Download finished concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
