use crate::domain::{
    errors::RepositoryResult,
    models::{ExternalDownload, OutboxRecord},
    value_objects::{DownloadId, IdempotencyKey},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for external download requests
#[async_trait]
pub trait ExternalDownloadRepository: Send + Sync + 'static {
    /// Insert (version 0) or update, plus new outbox rows, in one commit.
    /// Inserting a second download with a taken idempotency key fails with
    /// `RepositoryError::DuplicateKey`.
    async fn save(
        &self,
        download: &mut ExternalDownload,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: DownloadId) -> RepositoryResult<Option<ExternalDownload>>;

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<ExternalDownload>>;

    /// PROCESSING downloads last touched at or before `updated_before`, oldest first
    async fn find_processing(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<ExternalDownload>>;
}
