use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{event_dispatcher::EventDispatcher, outbox_rows_for, settings::DownloadSettings};
use crate::{
    domain::{
        errors::{DownloadError, DownloadResult, RepositoryError},
        models::{DomainEvent, ExternalDownload, NewExternalDownload, OutboxKind},
        value_objects::{BucketName, DownloadId, HttpUrl, ObjectKey, ObjectLocation},
    },
    ports::{
        events::DomainEventListener,
        repositories::{ExternalDownloadRepository, OutboxRepository},
        services::{DownloadReceipt, ExternalDownloadService, RequestDownloadCommand},
        system::{Clock, IdGenerator},
    },
};

/// Implementation of the ExternalDownloadService
#[derive(Clone)]
pub struct ExternalDownloadServiceImpl {
    downloads: Arc<dyn ExternalDownloadRepository>,
    outbox: Arc<dyn OutboxRepository>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: DownloadSettings,
}

impl ExternalDownloadServiceImpl {
    pub fn new(
        downloads: Arc<dyn ExternalDownloadRepository>,
        outbox: Arc<dyn OutboxRepository>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            downloads,
            outbox,
            dispatcher,
            clock,
            ids,
            settings,
        }
    }

    fn default_destination(
        &self,
        download_id: DownloadId,
        source_url: &HttpUrl,
    ) -> DownloadResult<ObjectLocation> {
        let bucket = BucketName::new(self.settings.default_bucket.as_str())?;
        let file_name = source_url.file_name().unwrap_or("download");
        let key = ObjectKey::new(format!(
            "{}/{}/{}",
            self.settings.key_prefix, download_id, file_name
        ))?;
        Ok(ObjectLocation::new(bucket, key))
    }

    /// Identifiers of an already registered download
    async fn replay_receipt(&self, download: &ExternalDownload) -> DownloadResult<DownloadReceipt> {
        let rows = self
            .outbox
            .find_by_owner(download.id().as_uuid(), OutboxKind::DownloadRegistration)
            .await?;
        Ok(DownloadReceipt {
            download_id: download.id(),
            outbox_id: rows.first().map(|r| r.id()),
            status: download.status(),
            replayed: true,
        })
    }

    async fn load(&self, download_id: DownloadId) -> DownloadResult<ExternalDownload> {
        self.downloads
            .find_by_id(download_id)
            .await?
            .ok_or(DownloadError::NotFound {
                entity: "external download",
                id: download_id.as_uuid(),
            })
    }

    async fn commit(&self, mut download: ExternalDownload) -> DownloadResult<ExternalDownload> {
        let mut rows = outbox_rows_for(
            download.pending_events(),
            self.ids.as_ref(),
            self.clock.now(),
        );
        self.downloads.save(&mut download, &mut rows).await?;
        self.dispatcher.dispatch(download.take_events()).await;
        Ok(download)
    }
}

#[async_trait]
impl ExternalDownloadService for ExternalDownloadServiceImpl {
    #[instrument(skip(self, command), fields(idempotency_key = %command.idempotency_key))]
    async fn request_download(
        &self,
        command: RequestDownloadCommand,
    ) -> DownloadResult<DownloadReceipt> {
        if let Some(existing) = self
            .downloads
            .find_by_idempotency_key(&command.idempotency_key)
            .await?
        {
            debug!(download_id = %existing.id(), "Replayed download request");
            return self.replay_receipt(&existing).await;
        }

        let download_id = DownloadId::from_uuid(self.ids.next_id());
        let destination = match command.destination {
            Some(destination) => destination,
            None => self.default_destination(download_id, &command.source_url)?,
        };
        let key = command.idempotency_key.clone();

        let mut download = ExternalDownload::request(
            NewExternalDownload {
                id: download_id,
                idempotency_key: command.idempotency_key,
                source_url: command.source_url,
                destination,
                tags: command.tags,
                webhook_url: command.webhook_url,
                callback_url: command.callback_url,
                max_retries: command
                    .max_retries
                    .unwrap_or(self.settings.default_max_retries),
            },
            self.clock.now(),
        )?;
        let mut rows = outbox_rows_for(
            download.pending_events(),
            self.ids.as_ref(),
            self.clock.now(),
        );

        match self.downloads.save(&mut download, &mut rows).await {
            Ok(()) => {}
            Err(RepositoryError::DuplicateKey { .. }) => {
                // A concurrent request with the same key committed first
                let existing = self
                    .downloads
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or(DownloadError::Repository(RepositoryError::DuplicateKey {
                        entity: "external download",
                        key: key.to_string(),
                    }))?;
                return self.replay_receipt(&existing).await;
            }
            Err(e) => return Err(e.into()),
        }

        let receipt = DownloadReceipt {
            download_id,
            outbox_id: rows.first().map(|r| r.id()),
            status: download.status(),
            replayed: false,
        };
        info!(download_id = %download_id, source_url = %download.source_url(), "Download registered");

        self.dispatcher.dispatch(download.take_events()).await;
        Ok(receipt)
    }

    async fn get_download(&self, download_id: DownloadId) -> DownloadResult<ExternalDownload> {
        self.load(download_id).await
    }

    #[instrument(skip(self))]
    async fn complete_download(
        &self,
        download_id: DownloadId,
        etag: String,
    ) -> DownloadResult<ExternalDownload> {
        let mut download = self.load(download_id).await?;
        download.complete(etag, self.clock.now())?;
        let download = self.commit(download).await?;
        info!(download_id = %download_id, "Download completed");
        Ok(download)
    }

    #[instrument(skip(self))]
    async fn fail_download(
        &self,
        download_id: DownloadId,
        error: String,
    ) -> DownloadResult<ExternalDownload> {
        let mut download = self.load(download_id).await?;
        download.fail(error, self.clock.now())?;
        let download = self.commit(download).await?;
        warn!(download_id = %download_id, "Download failed permanently");
        Ok(download)
    }
}

/// Moves the download request along when its task finishes
pub struct DownloadLifecycleListener {
    downloads: Arc<dyn ExternalDownloadService>,
}

impl DownloadLifecycleListener {
    pub fn new(downloads: Arc<dyn ExternalDownloadService>) -> Self {
        Self { downloads }
    }
}

#[async_trait]
impl DomainEventListener for DownloadLifecycleListener {
    fn name(&self) -> &'static str {
        "download-lifecycle"
    }

    async fn on_event(&self, event: &DomainEvent) {
        let (download_id, result) = match event {
            DomainEvent::DownloadTaskCompleted {
                download_id, etag, ..
            } => (
                *download_id,
                self.downloads
                    .complete_download(*download_id, etag.clone())
                    .await,
            ),
            DomainEvent::DownloadTaskExhausted {
                download_id,
                last_error,
                ..
            } => (
                *download_id,
                self.downloads
                    .fail_download(*download_id, last_error.clone())
                    .await,
            ),
            _ => return,
        };

        match result {
            Ok(_) => {}
            Err(e @ DownloadError::IllegalState { .. }) => {
                debug!(download_id = %download_id, error = %e, "Download already finished");
            }
            Err(e) => {
                warn!(download_id = %download_id, error = %e, "Could not update download after task outcome");
            }
        }
    }
}
