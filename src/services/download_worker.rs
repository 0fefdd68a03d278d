use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::{event_dispatcher::EventDispatcher, outbox_rows_for};
use crate::{
    domain::{
        errors::{DownloadError, DownloadResult, RepositoryError},
        models::{
            retry_policy::to_chrono, DownloadTask, DownloadTaskStatus, ExternalDownloadStatus,
            FailureOutcome, NewDownloadTask, OutboxPayload,
        },
        value_objects::{DownloadId, DownloadTaskId},
    },
    ports::{
        fetcher::{FetchError, RemoteFetcher},
        messaging::BrokerMessage,
        repositories::{DownloadTaskRepository, ExternalDownloadRepository},
        storage::ObjectStorageClient,
        system::{Clock, IdGenerator},
    },
};

/// What one run of a task ended in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
    Completed { etag: String, size: u64 },
    Requeued { attempt: u32 },
    /// Budget used up on this run
    Exhausted,
    /// Another worker holds or already finished the task
    Skipped { status: DownloadTaskStatus },
}

/// Executes download tasks delivered through the broker
pub struct DownloadTaskWorker {
    downloads: Arc<dyn ExternalDownloadRepository>,
    tasks: Arc<dyn DownloadTaskRepository>,
    fetcher: Arc<dyn RemoteFetcher>,
    storage: Arc<dyn ObjectStorageClient>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    fetch_timeout: Duration,
    /// A DOWNLOADING claim older than this belongs to a worker that died
    claim_timeout: Duration,
}

impl DownloadTaskWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        downloads: Arc<dyn ExternalDownloadRepository>,
        tasks: Arc<dyn DownloadTaskRepository>,
        fetcher: Arc<dyn RemoteFetcher>,
        storage: Arc<dyn ObjectStorageClient>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        fetch_timeout: Duration,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            downloads,
            tasks,
            fetcher,
            storage,
            dispatcher,
            clock,
            ids,
            fetch_timeout,
            claim_timeout,
        }
    }

    /// Handle a registration or queue-dispatch message. Other messages are ignored.
    #[instrument(skip(self, message), fields(idempotency_key = %message.idempotency_key))]
    pub async fn handle_message(
        &self,
        message: &BrokerMessage,
    ) -> DownloadResult<Option<TaskRunOutcome>> {
        let payload: OutboxPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, message_type = %message.message_type, "Dropping undecodable message");
                return Ok(None);
            }
        };

        match payload {
            OutboxPayload::DownloadRegistration { download_id, .. } => {
                let task = self.ensure_task(download_id).await?;
                self.run(task.id()).await.map(Some)
            }
            OutboxPayload::QueueDispatch { task_id, .. } => self.run(task_id).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Create the task for a download, or return the one a previous delivery created
    pub async fn ensure_task(&self, download_id: DownloadId) -> DownloadResult<DownloadTask> {
        let task_id = DownloadTaskId::for_download(download_id);
        if let Some(task) = self.tasks.find_by_id(task_id).await? {
            return Ok(task);
        }

        let mut download = self
            .downloads
            .find_by_id(download_id)
            .await?
            .ok_or(DownloadError::NotFound {
                entity: "external download",
                id: download_id.as_uuid(),
            })?;

        let now = self.clock.now();
        if download.status() == ExternalDownloadStatus::Pending {
            download.start_processing(now)?;
            match self.downloads.save(&mut download, &mut []).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    debug!(download_id = %download_id, "Download picked up concurrently")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut task = DownloadTask::create(
            NewDownloadTask {
                download_id,
                source_url: download.source_url().clone(),
                destination: download.destination().clone(),
                tags: download.tags().to_vec(),
                callback_url: download.callback_url().cloned(),
                max_retries: download.max_retries(),
            },
            now,
        )?;

        match self.tasks.save(&mut task, &mut []).await {
            Ok(()) => Ok(task),
            Err(RepositoryError::DuplicateKey { .. }) => self
                .tasks
                .find_by_id(task_id)
                .await?
                .ok_or(DownloadError::NotFound {
                    entity: "download task",
                    id: task_id.as_uuid(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim, fetch, store, then record the outcome with its outbox rows
    #[instrument(skip(self))]
    pub async fn run(&self, task_id: DownloadTaskId) -> DownloadResult<TaskRunOutcome> {
        let mut task = self
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or(DownloadError::NotFound {
                entity: "download task",
                id: task_id.as_uuid(),
            })?;

        if task.is_stale_claim(self.stale_claim_cutoff()) {
            return self.release_abandoned(task).await;
        }
        if task.status() != DownloadTaskStatus::Pending && !task.is_dead() {
            debug!(task_id = %task_id, status = %task.status(), "Task not claimable");
            return Ok(TaskRunOutcome::Skipped {
                status: task.status(),
            });
        }

        task.claim(self.clock.now())?;
        match self.tasks.save(&mut task, &mut []).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(task_id = %task_id, "Task claimed by another worker");
                return Ok(TaskRunOutcome::Skipped {
                    status: DownloadTaskStatus::Downloading,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.download(&task).await;
        let now = self.clock.now();
        let outcome = match result {
            Ok((etag, size)) => {
                task.complete(etag.clone(), size, now)?;
                info!(task_id = %task_id, size, "Download task completed");
                TaskRunOutcome::Completed { etag, size }
            }
            Err(e) => match task.fail(e.to_string(), now)? {
                FailureOutcome::Requeued { attempt } => {
                    warn!(task_id = %task_id, attempt, error = %e, "Download attempt failed, re-queued");
                    TaskRunOutcome::Requeued { attempt }
                }
                FailureOutcome::Exhausted => {
                    error!(
                        task_id = %task_id,
                        retries = task.retry_count(),
                        error = %e,
                        "Download task exhausted its retry budget"
                    );
                    TaskRunOutcome::Exhausted
                }
            },
        };

        self.commit(&mut task, now).await?;
        Ok(outcome)
    }

    async fn commit(&self, task: &mut DownloadTask, now: DateTime<Utc>) -> DownloadResult<()> {
        let mut rows = outbox_rows_for(task.pending_events(), self.ids.as_ref(), now);
        self.tasks.save(task, &mut rows).await?;
        self.dispatcher.dispatch(task.take_events()).await;
        Ok(())
    }

    fn stale_claim_cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - to_chrono(self.claim_timeout)
    }

    /// Count an abandoned claim as a failed attempt, re-queueing or
    /// finishing the task like any other failure
    async fn release_abandoned(&self, mut task: DownloadTask) -> DownloadResult<TaskRunOutcome> {
        let task_id = task.id();
        let now = self.clock.now();
        let reason = format!(
            "claim abandoned: no result within {}s",
            self.claim_timeout.as_secs()
        );
        let outcome = match task.fail(reason, now)? {
            FailureOutcome::Requeued { attempt } => TaskRunOutcome::Requeued { attempt },
            FailureOutcome::Exhausted => TaskRunOutcome::Exhausted,
        };

        match self.commit(&mut task, now).await {
            Ok(()) => {
                warn!(task_id = %task_id, outcome = ?outcome, "Released abandoned download claim");
                Ok(outcome)
            }
            Err(DownloadError::Repository(e)) if e.is_conflict() => {
                debug!(task_id = %task_id, "Abandoned claim resolved concurrently");
                Ok(TaskRunOutcome::Skipped {
                    status: DownloadTaskStatus::Downloading,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Release every claim held past the claim timeout. Returns how many were released.
    #[instrument(skip(self))]
    pub async fn release_stale_claims(&self, limit: usize) -> DownloadResult<usize> {
        let stale = self
            .tasks
            .find_stale_claims(self.stale_claim_cutoff(), limit)
            .await?;

        let mut released = 0;
        for task in stale {
            let task_id = task.id();
            match self.release_abandoned(task).await {
                Ok(TaskRunOutcome::Skipped { .. }) => {}
                Ok(_) => released += 1,
                Err(e) => warn!(task_id = %task_id, error = %e, "Could not release stale claim"),
            }
        }
        Ok(released)
    }

    /// A timeout counts as a failed attempt; the fetch is not cancelled upstream
    async fn download(&self, task: &DownloadTask) -> DownloadResult<(String, u64)> {
        let url = task.source_url();
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await
        {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                return Err(DownloadError::Fetch {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                let timeout = FetchError::Timeout {
                    url: url.to_string(),
                    seconds: self.fetch_timeout.as_secs(),
                };
                return Err(DownloadError::Fetch {
                    message: timeout.to_string(),
                });
            }
        };

        let size = fetched.data.len() as u64;
        let etag = self
            .storage
            .put_object(
                task.destination(),
                fetched.data,
                fetched.content_type.as_deref(),
            )
            .await?;
        Ok((etag, size))
    }

    /// Feed messages from an in-process broker until the channel closes
    pub async fn consume(&self, mut messages: mpsc::UnboundedReceiver<BrokerMessage>) {
        while let Some(message) = messages.recv().await {
            if let Err(e) = self.handle_message(&message).await {
                warn!(error = %e, message_type = %message.message_type, "Download message failed");
            }
        }
        debug!("Download message channel closed");
    }
}
