use crate::domain::{
    errors::RepositoryResult,
    models::{DownloadTask, OutboxRecord},
    value_objects::DownloadTaskId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for download tasks
#[async_trait]
pub trait DownloadTaskRepository: Send + Sync + 'static {
    /// Insert (version 0) or update, plus new outbox rows, in one commit
    async fn save(&self, task: &mut DownloadTask, outbox: &mut [OutboxRecord]) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: DownloadTaskId) -> RepositoryResult<Option<DownloadTask>>;

    /// DOWNLOADING tasks whose claim was last touched at or before `claimed_before`
    async fn find_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DownloadTask>>;
}
