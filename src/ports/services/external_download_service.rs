use crate::domain::{
    errors::DownloadResult,
    models::{ExternalDownload, ExternalDownloadStatus},
    value_objects::{DownloadId, HttpUrl, IdempotencyKey, ObjectLocation, OutboxId},
};
use async_trait::async_trait;

/// Request to fetch a file from an external URL
#[derive(Debug, Clone)]
pub struct RequestDownloadCommand {
    pub idempotency_key: IdempotencyKey,
    pub source_url: HttpUrl,
    /// Defaults to the configured download bucket and the URL's file name
    pub destination: Option<ObjectLocation>,
    pub tags: Vec<String>,
    pub webhook_url: Option<HttpUrl>,
    pub callback_url: Option<HttpUrl>,
    /// Falls back to the configured default
    pub max_retries: Option<u32>,
}

/// Identifiers handed back to the requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub download_id: DownloadId,
    pub outbox_id: Option<OutboxId>,
    pub status: ExternalDownloadStatus,
    /// True when the idempotency key matched an earlier request
    pub replayed: bool,
}

/// Service port for server-initiated downloads
#[async_trait]
pub trait ExternalDownloadService: Send + Sync + 'static {
    /// Register a download; repeated keys return the original identifiers
    async fn request_download(&self, command: RequestDownloadCommand)
        -> DownloadResult<DownloadReceipt>;

    async fn get_download(&self, download_id: DownloadId) -> DownloadResult<ExternalDownload>;

    /// Record that the file reached storage
    async fn complete_download(&self, download_id: DownloadId, etag: String)
        -> DownloadResult<ExternalDownload>;

    /// Record that the download was given up
    async fn fail_download(&self, download_id: DownloadId, error: String)
        -> DownloadResult<ExternalDownload>;
}
