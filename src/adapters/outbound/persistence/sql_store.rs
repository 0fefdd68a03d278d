use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::{
    domain::{
        errors::{RepositoryError, RepositoryResult},
        models::{
            DownloadTask, DownloadTaskStatus, ExternalDownload, ExternalDownloadStatus, OutboxKind,
            OutboxRecord, OutboxRetryPolicy, OutboxStatus, SessionStatus, UploadSession,
        },
        value_objects::{DownloadId, DownloadTaskId, IdempotencyKey, SessionId},
    },
    ports::repositories::{
        DownloadTaskRepository, ExternalDownloadRepository, OutboxRepository,
        UploadSessionRepository,
    },
};

/// PostgreSQL implementation of every repository port.
///
/// Each aggregate is stored as a JSONB document next to the columns the
/// sweeps filter on. A save runs the version-checked aggregate write and the
/// outbox inserts in one transaction.
#[derive(Clone)]
pub struct SqlStore {
    pool: PgPool,
}

fn db_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database {
        message: e.to_string(),
    }
}

fn write_error(entity: &'static str, key: &str, e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::DuplicateKey {
            entity,
            key: key.to_string(),
        },
        _ => db_error(e),
    }
}

fn decode<T: DeserializeOwned>(row: &PgRow) -> RepositoryResult<T> {
    let data: serde_json::Value = row.try_get("data").map_err(db_error)?;
    Ok(serde_json::from_value(data)?)
}

fn encode<T: Serialize>(value: &T) -> RepositoryResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn conflict(entity: &'static str, id: impl std::fmt::Display, expected_version: u64) -> RepositoryError {
    RepositoryError::Conflict {
        entity,
        id: id.to_string(),
        expected_version,
    }
}

async fn insert_outbox_rows(conn: &mut PgConnection, rows: &[OutboxRecord]) -> RepositoryResult<()> {
    for row in rows {
        if row.version() != 0 {
            return Err(RepositoryError::DuplicateKey {
                entity: "outbox",
                key: row.id().to_string(),
            });
        }
        let mut snapshot = row.clone();
        snapshot.mark_persisted();

        sqlx::query(
            r#"
            INSERT INTO outbox
                (id, owner_key, kind, idempotency_key, status, retry_count,
                 created_at, updated_at, processed_at, version, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(snapshot.id().as_uuid())
        .bind(snapshot.owner_key())
        .bind(snapshot.kind().as_str())
        .bind(snapshot.idempotency_key().as_str())
        .bind(snapshot.status().as_str())
        .bind(snapshot.retry_count() as i32)
        .bind(snapshot.created_at())
        .bind(snapshot.updated_at())
        .bind(snapshot.processed_at())
        .bind(snapshot.version() as i64)
        .bind(encode(&snapshot)?)
        .execute(&mut *conn)
        .await
        .map_err(|e| write_error("outbox", row.idempotency_key().as_str(), e))?;
    }
    Ok(())
}

fn mark_rows_persisted(rows: &mut [OutboxRecord]) {
    for row in rows.iter_mut() {
        row.mark_persisted();
    }
}

impl SqlStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize database tables
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                id UUID PRIMARY KEY,
                kind VARCHAR NOT NULL,
                status VARCHAR NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_upload_sessions_expiry ON upload_sessions(status, expires_at);

            CREATE TABLE IF NOT EXISTS outbox (
                id UUID PRIMARY KEY,
                owner_key UUID NOT NULL,
                kind VARCHAR NOT NULL,
                idempotency_key VARCHAR NOT NULL UNIQUE,
                status VARCHAR NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                version BIGINT NOT NULL,
                data JSONB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_outbox_owner ON outbox(owner_key, kind);
            CREATE INDEX IF NOT EXISTS idx_outbox_unpublished ON outbox(status, updated_at);

            CREATE TABLE IF NOT EXISTS external_downloads (
                id UUID PRIMARY KEY,
                idempotency_key VARCHAR NOT NULL UNIQUE,
                status VARCHAR NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS download_tasks (
                id UUID PRIMARY KEY,
                download_id UUID NOT NULL,
                status VARCHAR NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_download_tasks_download ON download_tasks(download_id);
            CREATE INDEX IF NOT EXISTS idx_download_tasks_claims ON download_tasks(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_external_downloads_status ON external_downloads(status, updated_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UploadSessionRepository for SqlStore {
    async fn save(
        &self,
        session: &mut UploadSession,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()> {
        let mut snapshot = session.clone();
        snapshot.take_events();
        snapshot.mark_persisted();
        let data = encode(&snapshot)?;
        let id = session.id();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if session.version() == 0 {
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (id, kind, status, expires_at, updated_at, version, data)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.kind().as_str())
            .bind(snapshot.status().as_str())
            .bind(snapshot.expires_at())
            .bind(snapshot.core().updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("upload session", &id.to_string(), e))?;
        } else {
            let result = sqlx::query(
                r#"
                UPDATE upload_sessions
                SET status = $2, expires_at = $3, updated_at = $4, version = $5, data = $6
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.status().as_str())
            .bind(snapshot.expires_at())
            .bind(snapshot.core().updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .bind(session.version() as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(conflict("upload session", id, session.version()));
            }
        }

        insert_outbox_rows(&mut *tx, outbox).await?;
        tx.commit().await.map_err(db_error)?;

        session.mark_persisted();
        mark_rows_persisted(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT data FROM upload_sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSession>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM upload_sessions
            WHERE status = $1 AND expires_at < $2
            ORDER BY expires_at
            LIMIT $3
            "#,
        )
        .bind(SessionStatus::Active.as_str())
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }
}

#[async_trait]
impl OutboxRepository for SqlStore {
    async fn find_by_owner(
        &self,
        owner_key: Uuid,
        kind: OutboxKind,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            "SELECT data FROM outbox WHERE owner_key = $1 AND kind = $2 ORDER BY created_at",
        )
        .bind(owner_key)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<OutboxRecord>> {
        let row = sqlx::query("SELECT data FROM outbox WHERE idempotency_key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, record: &mut OutboxRecord) -> RepositoryResult<()> {
        let mut snapshot = record.clone();
        snapshot.mark_persisted();

        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = $2, retry_count = $3, updated_at = $4, processed_at = $5,
                version = $6, data = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(record.id().as_uuid())
        .bind(snapshot.status().as_str())
        .bind(snapshot.retry_count() as i32)
        .bind(snapshot.updated_at())
        .bind(snapshot.processed_at())
        .bind(snapshot.version() as i64)
        .bind(encode(&snapshot)?)
        .bind(record.version() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(conflict("outbox", record.id(), record.version()));
        }
        record.mark_persisted();
        Ok(())
    }

    async fn find_due(
        &self,
        policy: &OutboxRetryPolicy,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        // Same rule as OutboxRetryPolicy::is_due: per-kind budget, then
        // updated_at + delay(retry_count) <= now
        let rows = sqlx::query(
            r#"
            SELECT data FROM outbox
            WHERE status <> $1
              AND (status = $2 OR retry_count < CASE WHEN kind IN ($3, $4) THEN $5 ELSE $6 END)
              AND updated_at + CASE
                    WHEN retry_count = 0 THEN $7
                    ELSE LEAST($8 * power(2, LEAST(retry_count - 1, 20)), $9)
                  END * INTERVAL '1 millisecond' <= $10
            ORDER BY updated_at
            LIMIT $11
            "#,
        )
        .bind(OutboxStatus::Published.as_str())
        .bind(OutboxStatus::Pending.as_str())
        .bind(OutboxKind::Webhook.as_str())
        .bind(OutboxKind::Callback.as_str())
        .bind(policy.webhook_max_retries as i32)
        .bind(policy.max_retries as i32)
        .bind(policy.pending_grace.as_millis() as f64)
        .bind(policy.base_delay.as_millis() as f64)
        .bind(policy.max_delay.as_millis() as f64)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }

    async fn find_exhausted(
        &self,
        policy: &OutboxRetryPolicy,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM outbox
            WHERE status = $1
              AND retry_count >= CASE WHEN kind IN ($2, $3) THEN $4 ELSE $5 END
            ORDER BY updated_at
            LIMIT $6
            "#,
        )
        .bind(OutboxStatus::Failed.as_str())
        .bind(OutboxKind::Webhook.as_str())
        .bind(OutboxKind::Callback.as_str())
        .bind(policy.webhook_max_retries as i32)
        .bind(policy.max_retries as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }
}

#[async_trait]
impl ExternalDownloadRepository for SqlStore {
    async fn save(
        &self,
        download: &mut ExternalDownload,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()> {
        let mut snapshot = download.clone();
        snapshot.take_events();
        snapshot.mark_persisted();
        let data = encode(&snapshot)?;
        let id = download.id();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if download.version() == 0 {
            sqlx::query(
                r#"
                INSERT INTO external_downloads (id, idempotency_key, status, updated_at, version, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.idempotency_key().as_str())
            .bind(snapshot.status().as_str())
            .bind(snapshot.updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("external download", download.idempotency_key().as_str(), e))?;
        } else {
            let result = sqlx::query(
                r#"
                UPDATE external_downloads
                SET status = $2, updated_at = $3, version = $4, data = $5
                WHERE id = $1 AND version = $6
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.status().as_str())
            .bind(snapshot.updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .bind(download.version() as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(conflict("external download", id, download.version()));
            }
        }

        insert_outbox_rows(&mut *tx, outbox).await?;
        tx.commit().await.map_err(db_error)?;

        download.mark_persisted();
        mark_rows_persisted(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: DownloadId) -> RepositoryResult<Option<ExternalDownload>> {
        let row = sqlx::query("SELECT data FROM external_downloads WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<ExternalDownload>> {
        let row = sqlx::query("SELECT data FROM external_downloads WHERE idempotency_key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_processing(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<ExternalDownload>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM external_downloads
            WHERE status = $1 AND updated_at <= $2
            ORDER BY updated_at
            LIMIT $3
            "#,
        )
        .bind(ExternalDownloadStatus::Processing.as_str())
        .bind(updated_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }
}

#[async_trait]
impl DownloadTaskRepository for SqlStore {
    async fn save(&self, task: &mut DownloadTask, outbox: &mut [OutboxRecord]) -> RepositoryResult<()> {
        let mut snapshot = task.clone();
        snapshot.take_events();
        snapshot.mark_persisted();
        let data = encode(&snapshot)?;
        let id = task.id();

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if task.version() == 0 {
            sqlx::query(
                r#"
                INSERT INTO download_tasks (id, download_id, status, updated_at, version, data)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.download_id().as_uuid())
            .bind(snapshot.status().as_str())
            .bind(snapshot.updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("download task", &id.to_string(), e))?;
        } else {
            let result = sqlx::query(
                r#"
                UPDATE download_tasks
                SET status = $2, updated_at = $3, version = $4, data = $5
                WHERE id = $1 AND version = $6
                "#,
            )
            .bind(id.as_uuid())
            .bind(snapshot.status().as_str())
            .bind(snapshot.updated_at())
            .bind(snapshot.version() as i64)
            .bind(&data)
            .bind(task.version() as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            if result.rows_affected() == 0 {
                return Err(conflict("download task", id, task.version()));
            }
        }

        insert_outbox_rows(&mut *tx, outbox).await?;
        tx.commit().await.map_err(db_error)?;

        task.mark_persisted();
        mark_rows_persisted(outbox);
        Ok(())
    }

    async fn find_by_id(&self, id: DownloadTaskId) -> RepositoryResult<Option<DownloadTask>> {
        let row = sqlx::query("SELECT data FROM download_tasks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(decode).transpose()
    }

    async fn find_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<DownloadTask>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM download_tasks
            WHERE status = $1 AND updated_at <= $2
            ORDER BY updated_at
            LIMIT $3
            "#,
        )
        .bind(DownloadTaskStatus::Downloading.as_str())
        .bind(claimed_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(decode).collect()
    }
}
