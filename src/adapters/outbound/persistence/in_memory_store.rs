use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::{
        errors::{RepositoryError, RepositoryResult},
        models::{
            DownloadTask, ExternalDownload, ExternalDownloadStatus, OutboxKind, OutboxRecord,
            OutboxRetryPolicy, SessionStatus, UploadSession,
        },
        value_objects::{DownloadId, DownloadTaskId, IdempotencyKey, OutboxId, SessionId},
    },
    ports::repositories::{
        DownloadTaskRepository, ExternalDownloadRepository, OutboxRepository,
        UploadSessionRepository,
    },
};

/// In-memory implementation of every repository port, for testing and development.
///
/// All tables sit behind one lock so an aggregate and its outbox rows
/// commit together or not at all, like a database transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<Tables>>,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, UploadSession>,
    outbox: HashMap<OutboxId, OutboxRecord>,
    // commit order
    outbox_order: Vec<OutboxId>,
    // idempotency key -> row
    outbox_keys: HashMap<String, OutboxId>,
    downloads: HashMap<DownloadId, ExternalDownload>,
    // idempotency key -> download
    download_keys: HashMap<String, DownloadId>,
    tasks: HashMap<DownloadTaskId, DownloadTask>,
}

/// Version check shared by every aggregate table: version 0 means insert
fn check_version(
    entity: &'static str,
    id: impl std::fmt::Display,
    expected: u64,
    stored: Option<u64>,
) -> RepositoryResult<()> {
    match (expected, stored) {
        (0, None) => Ok(()),
        (0, Some(_)) => Err(RepositoryError::DuplicateKey {
            entity,
            key: id.to_string(),
        }),
        (v, Some(s)) if v == s => Ok(()),
        (v, _) => Err(RepositoryError::Conflict {
            entity,
            id: id.to_string(),
            expected_version: v,
        }),
    }
}

impl Tables {
    fn check_new_rows(&self, rows: &[OutboxRecord]) -> RepositoryResult<()> {
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            let key = row.idempotency_key().as_str();
            if row.version() != 0 || self.outbox.contains_key(&row.id()) {
                return Err(RepositoryError::DuplicateKey {
                    entity: "outbox",
                    key: row.id().to_string(),
                });
            }
            if self.outbox_keys.contains_key(key) || !seen.insert(key) {
                return Err(RepositoryError::DuplicateKey {
                    entity: "outbox",
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn insert_rows(&mut self, rows: &mut [OutboxRecord]) {
        for row in rows.iter_mut() {
            row.mark_persisted();
            self.outbox_keys
                .insert(row.idempotency_key().as_str().to_string(), row.id());
            self.outbox_order.push(row.id());
            self.outbox.insert(row.id(), row.clone());
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox row, in commit order
    pub async fn outbox_rows(&self) -> Vec<OutboxRecord> {
        let data = self.data.read().await;
        data.outbox_order
            .iter()
            .filter_map(|id| data.outbox.get(id).cloned())
            .collect()
    }

    pub async fn download_count(&self) -> usize {
        self.data.read().await.downloads.len()
    }

    pub async fn session_count(&self) -> usize {
        self.data.read().await.sessions.len()
    }
}

#[async_trait]
impl UploadSessionRepository for InMemoryStore {
    async fn save(
        &self,
        session: &mut UploadSession,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()> {
        let mut data = self.data.write().await;

        let stored = data.sessions.get(&session.id()).map(|s| s.version());
        check_version("upload session", session.id(), session.version(), stored)?;
        data.check_new_rows(outbox)?;

        session.mark_persisted();
        let mut snapshot = session.clone();
        snapshot.take_events();
        data.sessions.insert(session.id(), snapshot);
        data.insert_rows(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<UploadSession>> {
        Ok(self.data.read().await.sessions.get(&id).cloned())
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSession>> {
        let data = self.data.read().await;
        let mut due: Vec<UploadSession> = data
            .sessions
            .values()
            .filter(|s| s.status() == SessionStatus::Active && s.expires_at() < now)
            .cloned()
            .collect();
        due.sort_by_key(|s| s.expires_at());
        due.truncate(limit);
        Ok(due)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn find_by_owner(
        &self,
        owner_key: Uuid,
        kind: OutboxKind,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        let data = self.data.read().await;
        let mut rows: Vec<OutboxRecord> = data
            .outbox
            .values()
            .filter(|r| r.owner_key() == owner_key && r.kind() == kind)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at());
        Ok(rows)
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<OutboxRecord>> {
        let data = self.data.read().await;
        Ok(data
            .outbox_keys
            .get(key.as_str())
            .and_then(|id| data.outbox.get(id))
            .cloned())
    }

    async fn update(&self, record: &mut OutboxRecord) -> RepositoryResult<()> {
        let mut data = self.data.write().await;
        let stored = data.outbox.get(&record.id()).map(|r| r.version());
        if record.version() == 0 || stored != Some(record.version()) {
            return Err(RepositoryError::Conflict {
                entity: "outbox",
                id: record.id().to_string(),
                expected_version: record.version(),
            });
        }

        record.mark_persisted();
        data.outbox.insert(record.id(), record.clone());
        Ok(())
    }

    async fn find_due(
        &self,
        policy: &OutboxRetryPolicy,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        let data = self.data.read().await;
        let mut rows: Vec<OutboxRecord> = data
            .outbox
            .values()
            .filter(|r| policy.is_due(r, now))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.updated_at());
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_exhausted(
        &self,
        policy: &OutboxRetryPolicy,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        let data = self.data.read().await;
        let mut rows: Vec<OutboxRecord> = data
            .outbox
            .values()
            .filter(|r| policy.is_exhausted(r))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.updated_at());
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl ExternalDownloadRepository for InMemoryStore {
    async fn save(
        &self,
        download: &mut ExternalDownload,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()> {
        let mut data = self.data.write().await;

        let stored = data.downloads.get(&download.id()).map(|d| d.version());
        check_version("external download", download.id(), download.version(), stored)?;
        let key = download.idempotency_key().as_str();
        if download.version() == 0 && data.download_keys.contains_key(key) {
            return Err(RepositoryError::DuplicateKey {
                entity: "external download",
                key: key.to_string(),
            });
        }
        data.check_new_rows(outbox)?;

        download.mark_persisted();
        let mut snapshot = download.clone();
        snapshot.take_events();
        data.download_keys
            .insert(download.idempotency_key().as_str().to_string(), download.id());
        data.downloads.insert(download.id(), snapshot);
        data.insert_rows(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: DownloadId) -> RepositoryResult<Option<ExternalDownload>> {
        Ok(self.data.read().await.downloads.get(&id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<ExternalDownload>> {
        let data = self.data.read().await;
        Ok(data
            .download_keys
            .get(key.as_str())
            .and_then(|id| data.downloads.get(id))
            .cloned())
    }

    async fn find_processing(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<ExternalDownload>> {
        let data = self.data.read().await;
        let mut downloads: Vec<ExternalDownload> = data
            .downloads
            .values()
            .filter(|d| {
                d.status() == ExternalDownloadStatus::Processing && d.updated_at() <= updated_before
            })
            .cloned()
            .collect();
        downloads.sort_by_key(|d| d.updated_at());
        downloads.truncate(limit);
        Ok(downloads)
    }
}

#[async_trait]
impl DownloadTaskRepository for InMemoryStore {
    async fn save(&self, task: &mut DownloadTask, outbox: &mut [OutboxRecord]) -> RepositoryResult<()> {
        let mut data = self.data.write().await;

        let stored = data.tasks.get(&task.id()).map(|t| t.version());
        check_version("download task", task.id(), task.version(), stored)?;
        data.check_new_rows(outbox)?;

        task.mark_persisted();
        let mut snapshot = task.clone();
        snapshot.take_events();
        data.tasks.insert(task.id(), snapshot);
        data.insert_rows(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: DownloadTaskId) -> RepositoryResult<Option<DownloadTask>> {
        Ok(self.data.read().await.tasks.get(&id).cloned())
    }

    async fn find_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DownloadTask>> {
        let data = self.data.read().await;
        let mut tasks: Vec<DownloadTask> = data
            .tasks
            .values()
            .filter(|t| t.is_stale_claim(claimed_before))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.updated_at());
        tasks.truncate(limit);
        Ok(tasks)
    }
}
