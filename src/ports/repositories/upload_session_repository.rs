use crate::domain::{
    errors::RepositoryResult,
    models::{OutboxRecord, UploadSession},
    value_objects::SessionId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Repository for upload sessions
///
/// Writes are optimistic: a session whose `version` no longer matches the
/// stored one is rejected with `RepositoryError::Conflict`. On success the
/// passed aggregate and outbox rows have their versions bumped.
#[async_trait]
pub trait UploadSessionRepository: Send + Sync + 'static {
    /// Insert (version 0) or update the session, plus any new outbox rows, in one commit
    async fn save(
        &self,
        session: &mut UploadSession,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()>;

    /// Get a session by id
    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<UploadSession>>;

    /// ACTIVE sessions whose TTL ran out before `now`, oldest expiry first
    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSession>>;
}
