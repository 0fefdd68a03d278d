#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use ingest_outbox_server::{
    adapters::outbound::{
        messaging::{InMemoryMessageBroker, RecordingWebhookSender},
        persistence::InMemoryStore,
        storage::ObjectStoreStorageAdapter,
    },
    app::{AppBuilder, AppConfig, AppServices, Repositories},
    domain::{
        errors::{RepositoryError, RepositoryResult, StorageResult},
        models::{CompletedPart, OutboxKind, OutboxRecord, OutboxRetryPolicy, UploadSession},
        value_objects::{
            ContentDescriptor, HttpUrl, IdempotencyKey, ObjectLocation, SessionId,
        },
    },
    ports::{
        fetcher::{FetchError, FetchedFile, RemoteFetcher},
        repositories::{OutboxRepository, UploadSessionRepository},
        services::{RequestDownloadCommand, StartUploadCommand},
        storage::{ObjectHead, ObjectStorageClient},
        system::ManualClock,
    },
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// Fetcher that fails a set number of times, then serves `body`
pub struct ScriptedFetcher {
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    body: Bytes,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn serving(body: &'static [u8]) -> Self {
        Self::failing_first(0, body)
    }

    pub fn failing_first(failures: usize, body: &'static [u8]) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            body: Bytes::from_static(body),
            delay: None,
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX, b"")
    }

    pub fn hanging(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::serving(b"late")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &HttpUrl) -> Result<FetchedFile, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        Ok(FetchedFile {
            data: self.body.clone(),
            content_type: Some("image/jpeg".to_string()),
        })
    }
}

/// Storage double that records aborts and treats repeats as provider no-ops
pub struct RecordingStorage {
    inner: ObjectStoreStorageAdapter,
    aborts: Mutex<Vec<String>>,
    hide_etags: AtomicBool,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self {
            inner: ObjectStoreStorageAdapter::in_memory(&["uploads", "downloads"]),
            aborts: Mutex::new(Vec::new()),
            hide_etags: AtomicBool::new(false),
        }
    }

    /// Report heads without an etag, as some S3-compatible providers do
    pub fn hide_etags(&self) {
        self.hide_etags.store(true, Ordering::SeqCst);
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().unwrap().clone()
    }

    pub fn adapter(&self) -> &ObjectStoreStorageAdapter {
        &self.inner
    }
}

#[async_trait]
impl ObjectStorageClient for RecordingStorage {
    async fn presign_upload(&self, location: &ObjectLocation, ttl: Duration) -> StorageResult<String> {
        self.inner.presign_upload(location, ttl).await
    }

    async fn initiate_multipart(&self, location: &ObjectLocation) -> StorageResult<String> {
        self.inner.initiate_multipart(location).await
    }

    async fn abort_multipart(&self, _location: &ObjectLocation, upload_id: &str) -> StorageResult<()> {
        self.aborts.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<String> {
        self.inner.complete_multipart(location, upload_id, parts).await
    }

    async fn put_object(
        &self,
        location: &ObjectLocation,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.inner.put_object(location, data, content_type).await
    }

    async fn head_object(&self, location: &ObjectLocation) -> StorageResult<ObjectHead> {
        let mut head = self.inner.head_object(location).await?;
        if self.hide_etags.load(Ordering::SeqCst) {
            head.etag = None;
        }
        Ok(head)
    }
}

/// Session repository whose next saves fail as if the database dropped out
pub struct FlakySessionRepository {
    inner: InMemoryStore,
    failures_left: AtomicUsize,
}

impl FlakySessionRepository {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_saves(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadSessionRepository for FlakySessionRepository {
    async fn save(
        &self,
        session: &mut UploadSession,
        outbox: &mut [OutboxRecord],
    ) -> RepositoryResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Database {
                message: "connection reset".to_string(),
            });
        }
        UploadSessionRepository::save(&self.inner, session, outbox).await
    }

    async fn find_by_id(&self, id: SessionId) -> RepositoryResult<Option<UploadSession>> {
        UploadSessionRepository::find_by_id(&self.inner, id).await
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<UploadSession>> {
        self.inner.find_expirable(now, limit).await
    }
}

/// Outbox repository whose next status updates fail
pub struct FlakyOutboxRepository {
    inner: InMemoryStore,
    failures_left: AtomicUsize,
}

impl FlakyOutboxRepository {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_updates(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboxRepository for FlakyOutboxRepository {
    async fn find_by_owner(
        &self,
        owner_key: Uuid,
        kind: OutboxKind,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        OutboxRepository::find_by_owner(&self.inner, owner_key, kind).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> RepositoryResult<Option<OutboxRecord>> {
        OutboxRepository::find_by_idempotency_key(&self.inner, key).await
    }

    async fn update(&self, record: &mut OutboxRecord) -> RepositoryResult<()> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Database {
                message: "connection reset".to_string(),
            });
        }
        OutboxRepository::update(&self.inner, record).await
    }

    async fn find_due(
        &self,
        policy: &OutboxRetryPolicy,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        OutboxRepository::find_due(&self.inner, policy, now, limit).await
    }

    async fn find_exhausted(
        &self,
        policy: &OutboxRetryPolicy,
        limit: usize,
    ) -> RepositoryResult<Vec<OutboxRecord>> {
        OutboxRepository::find_exhausted(&self.inner, policy, limit).await
    }
}

/// App wired to test doubles the test keeps handles to
pub struct TestApp {
    pub app: AppServices,
    pub store: InMemoryStore,
    pub clock: Arc<ManualClock>,
    pub broker: Arc<InMemoryMessageBroker>,
    pub webhooks: Arc<RecordingWebhookSender>,
    pub storage: Arc<RecordingStorage>,
}

pub async fn test_app(fetcher: Arc<dyn RemoteFetcher>) -> TestApp {
    test_app_with_config(AppConfig::default(), fetcher).await
}

pub async fn test_app_with_config(config: AppConfig, fetcher: Arc<dyn RemoteFetcher>) -> TestApp {
    let store = InMemoryStore::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let broker = Arc::new(InMemoryMessageBroker::new());
    let webhooks = Arc::new(RecordingWebhookSender::new());
    let storage = Arc::new(RecordingStorage::new());

    let app = AppBuilder::new()
        .with_config(config)
        .with_repositories(Repositories::from_store(Arc::new(store.clone())))
        .with_storage(storage.clone())
        .with_broker(broker.clone())
        .with_webhooks(webhooks.clone())
        .with_fetcher(fetcher)
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();

    TestApp {
        app,
        store,
        clock,
        broker,
        webhooks,
        storage,
    }
}

pub fn upload_command(key: &str, ttl_minutes: i64) -> StartUploadCommand {
    StartUploadCommand {
        policy_id: "policy-1".to_string(),
        uploader_id: "user-1".to_string(),
        descriptor: ContentDescriptor::new(key, 5, "text/plain").unwrap(),
        location: ObjectLocation::parse("uploads", key).unwrap(),
        ttl: Some(chrono::Duration::minutes(ttl_minutes)),
    }
}

pub fn download_command(key: &str, url: &str) -> RequestDownloadCommand {
    RequestDownloadCommand {
        idempotency_key: IdempotencyKey::new(key).unwrap(),
        source_url: HttpUrl::parse("sourceUrl", url).unwrap(),
        destination: None,
        tags: vec!["ingest".to_string()],
        webhook_url: None,
        callback_url: None,
        max_retries: None,
    }
}
