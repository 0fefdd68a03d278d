use crate::domain::{
    errors::RepositoryResult,
    models::{OutboxKind, OutboxRecord, OutboxRetryPolicy},
    value_objects::IdempotencyKey,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository for outbox rows.
///
/// Rows are only ever inserted alongside their owning aggregate (see the
/// aggregate repositories); this port covers lookups and the publish-outcome update.
#[async_trait]
pub trait OutboxRepository: Send + Sync + 'static {
    /// All rows of one kind written by the given owner, oldest first
    async fn find_by_owner(
        &self,
        owner_key: Uuid,
        kind: OutboxKind,
    ) -> RepositoryResult<Vec<OutboxRecord>>;

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<OutboxRecord>>;

    /// Persist a status transition, rejecting stale versions
    async fn update(&self, record: &mut OutboxRecord) -> RepositoryResult<()>;

    /// PENDING/FAILED rows within their kind's budget whose backoff has
    /// elapsed at `now`, least recently touched first
    async fn find_due(
        &self,
        policy: &OutboxRetryPolicy,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>>;

    /// FAILED rows that used up their kind's budget
    async fn find_exhausted(
        &self,
        policy: &OutboxRetryPolicy,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>>;
}
