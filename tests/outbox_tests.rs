mod common;

use async_trait::async_trait;
use common::{
    download_command, t0, test_app, test_app_with_config, FlakyOutboxRepository, ScriptedFetcher,
};
use ingest_outbox_server::{
    adapters::outbound::{
        messaging::{InMemoryMessageBroker, RecordingWebhookSender},
        persistence::InMemoryStore,
    },
    app::{AppConfig, Repositories},
    domain::models::{DomainEvent, OutboxKind, OutboxRetryPolicy, OutboxStatus},
    ports::{
        events::DomainEventListener,
        services::ExternalDownloadService,
        system::{ManualClock, RandomIdGenerator},
    },
    services::{
        DownloadSettings, EventDispatcher, ExternalDownloadServiceImpl, OutboxMessageManager,
        OutboxPublishingListener, OutboxSweeper,
    },
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CapturingListener {
    events: Mutex<Vec<DomainEvent>>,
}

#[async_trait]
impl DomainEventListener for CapturingListener {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn on_event(&self, event: &DomainEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn tight_policy() -> OutboxRetryPolicy {
    OutboxRetryPolicy {
        base_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(60),
        pending_grace: Duration::from_secs(5),
        max_retries: 2,
        webhook_max_retries: 4,
    }
}

#[tokio::test]
async fn test_committed_row_is_published_by_listener() {
    let store = InMemoryStore::new();
    let repositories = Repositories::from_store(Arc::new(store.clone()));
    let clock = Arc::new(ManualClock::new(t0()));
    let capture = Arc::new(CapturingListener::default());
    let dispatcher = Arc::new(EventDispatcher::new());
    dispatcher.register(capture.clone());

    let downloads = ExternalDownloadServiceImpl::new(
        repositories.downloads.clone(),
        repositories.outbox.clone(),
        dispatcher,
        clock.clone(),
        Arc::new(RandomIdGenerator),
        DownloadSettings::default(),
    );
    let receipt = downloads
        .request_download(download_command("k1", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();

    // Committed but not yet published
    let rows = store.outbox_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status(), OutboxStatus::Pending);
    assert_eq!(rows[0].kind(), OutboxKind::DownloadRegistration);
    assert_eq!(Some(rows[0].id()), receipt.outbox_id);

    let broker = Arc::new(InMemoryMessageBroker::new());
    let manager = Arc::new(OutboxMessageManager::new(
        broker.clone(),
        Arc::new(RecordingWebhookSender::new()),
    ));
    let publisher = OutboxPublishingListener::new(repositories.outbox.clone(), manager, clock);
    let events = capture.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    for event in &events {
        publisher.on_event(event).await;
    }

    let rows = store.outbox_rows().await;
    assert_eq!(rows[0].status(), OutboxStatus::Published);
    assert_eq!(rows[0].processed_at(), Some(t0()));
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].idempotency_key, rows[0].idempotency_key().to_string());

    // Delivering the same event again does not publish twice
    publisher.on_event(&events[0]).await;
    assert_eq!(broker.attempts(), 1);
}

#[tokio::test]
async fn test_declined_publish_marks_row_failed() {
    let t = test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    t.broker.set_accepting(false);

    t.app
        .downloads
        .request_download(download_command("declined", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();

    let rows = t.store.outbox_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status(), OutboxStatus::Failed);
    assert_eq!(rows[0].retry_count(), 1);
    assert_eq!(rows[0].processed_at(), None);
    assert!(rows[0].last_error().unwrap().contains("declined"));
}

#[tokio::test]
async fn test_panicking_broker_marks_row_failed() {
    let t = test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    t.broker.set_panicking(true);

    let receipt = t
        .app
        .downloads
        .request_download(download_command("panics", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();
    assert!(!receipt.replayed);

    let rows = t.store.outbox_rows().await;
    assert_eq!(rows[0].status(), OutboxStatus::Failed);
    assert_eq!(rows[0].retry_count(), 1);
    assert!(rows[0].last_error().unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_sweep_republishes_after_backoff() {
    let t = test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    t.broker.set_unavailable(true);
    t.app
        .downloads
        .request_download(download_command("later", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();
    t.broker.set_unavailable(false);

    // Backoff for the first retry has not elapsed
    t.clock.advance(chrono::Duration::seconds(10));
    let early = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(early.attempted, 0);

    t.clock.advance(chrono::Duration::seconds(25));
    let report = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.published, 1);

    let rows = t.store.outbox_rows().await;
    assert_eq!(rows[0].status(), OutboxStatus::Published);
    assert_eq!(rows[0].retry_count(), 1);
    assert_eq!(
        rows[0].processed_at(),
        Some(t0() + chrono::Duration::seconds(35))
    );
}

#[tokio::test]
async fn test_pending_row_waits_out_grace_period() {
    let store = InMemoryStore::new();
    let repositories = Repositories::from_store(Arc::new(store.clone()));
    let clock = Arc::new(ManualClock::new(t0()));
    let downloads = ExternalDownloadServiceImpl::new(
        repositories.downloads.clone(),
        repositories.outbox.clone(),
        Arc::new(EventDispatcher::new()),
        clock.clone(),
        Arc::new(RandomIdGenerator),
        DownloadSettings::default(),
    );
    downloads
        .request_download(download_command("orphan", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();

    let broker = Arc::new(InMemoryMessageBroker::new());
    let manager = Arc::new(OutboxMessageManager::new(
        broker.clone(),
        Arc::new(RecordingWebhookSender::new()),
    ));
    let sweeper = OutboxSweeper::new(
        repositories.outbox.clone(),
        manager,
        clock.clone(),
        OutboxRetryPolicy::default(),
        100,
    );

    clock.advance(chrono::Duration::seconds(59));
    assert_eq!(sweeper.sweep().await.unwrap().attempted, 0);

    clock.advance(chrono::Duration::seconds(2));
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(broker.published().len(), 1);
    assert_eq!(store.outbox_rows().await[0].status(), OutboxStatus::Published);
}

#[tokio::test]
async fn test_exhausted_rows_stop_being_retried() {
    let mut config = AppConfig::default();
    config.outbox.retry = tight_policy();
    let t = test_app_with_config(config, Arc::new(ScriptedFetcher::serving(b""))).await;
    t.broker.set_unavailable(true);

    t.app
        .downloads
        .request_download(download_command("doomed", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();

    t.clock.advance(chrono::Duration::seconds(11));
    let report = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.exhausted.len(), 1);

    let exhausted = t.app.outbox_sweeper.exhausted(10).await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].retry_count(), 2);

    t.clock.advance(chrono::Duration::hours(1));
    let attempts_before = t.broker.attempts();
    let later = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(later.attempted, 0);
    assert_eq!(t.broker.attempts(), attempts_before);
}

#[tokio::test]
async fn test_repeated_request_returns_original_identifiers() {
    let t = test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    let command = download_command("same-key", "https://cdn.example.com/a.jpg");

    let first = t.app.downloads.request_download(command.clone()).await.unwrap();
    let second = t.app.downloads.request_download(command).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.download_id, second.download_id);
    assert_eq!(first.outbox_id, second.outbox_id);
    assert_eq!(t.store.download_count().await, 1);
    assert_eq!(t.store.outbox_rows().await.len(), 1);
    assert_eq!(t.broker.published().len(), 1);
}

#[tokio::test]
async fn test_exhausted_rows_do_not_crowd_out_due_rows() {
    let mut config = AppConfig::default();
    config.outbox.retry = tight_policy();
    config.outbox.batch_size = 1;
    let t = test_app_with_config(config, Arc::new(ScriptedFetcher::serving(b""))).await;
    t.broker.set_unavailable(true);

    // Registration rows have a budget of 2, below the webhook budget of 4
    t.app
        .downloads
        .request_download(download_command("dead", "https://cdn.example.com/a.jpg"))
        .await
        .unwrap();
    t.clock.advance(chrono::Duration::seconds(11));
    let report = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(report.exhausted.len(), 1);

    // The dead row is the least recently touched
    t.clock.advance(chrono::Duration::seconds(1));
    t.app
        .downloads
        .request_download(download_command("healthy", "https://cdn.example.com/b.jpg"))
        .await
        .unwrap();
    t.broker.set_unavailable(false);

    t.clock.advance(chrono::Duration::seconds(11));
    let report = t.app.outbox_sweeper.sweep().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.published, 1);

    let rows = t.store.outbox_rows().await;
    assert_eq!(rows[0].status(), OutboxStatus::Failed);
    assert_eq!(rows[0].retry_count(), 2);
    assert_eq!(rows[1].status(), OutboxStatus::Published);
    assert_eq!(t.app.outbox_sweeper.exhausted(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_update_does_not_end_sweep() {
    let store = InMemoryStore::new();
    let repositories = Repositories::from_store(Arc::new(store.clone()));
    let clock = Arc::new(ManualClock::new(t0()));
    let downloads = ExternalDownloadServiceImpl::new(
        repositories.downloads.clone(),
        repositories.outbox.clone(),
        Arc::new(EventDispatcher::new()),
        clock.clone(),
        Arc::new(RandomIdGenerator),
        DownloadSettings::default(),
    );
    for key in ["first", "second"] {
        downloads
            .request_download(download_command(key, "https://cdn.example.com/a.jpg"))
            .await
            .unwrap();
    }

    let outbox = Arc::new(FlakyOutboxRepository::new(store.clone()));
    let broker = Arc::new(InMemoryMessageBroker::new());
    let manager = Arc::new(OutboxMessageManager::new(
        broker.clone(),
        Arc::new(RecordingWebhookSender::new()),
    ));
    let sweeper = OutboxSweeper::new(
        outbox.clone(),
        manager,
        clock.clone(),
        OutboxRetryPolicy::default(),
        100,
    );

    clock.advance(chrono::Duration::seconds(61));
    outbox.fail_next_updates(1);
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.published, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(broker.attempts(), 2);

    // The unrecorded row is still due and goes out again
    let report = sweeper.sweep().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.published, 1);
    assert!(store
        .outbox_rows()
        .await
        .iter()
        .all(|r| r.status() == OutboxStatus::Published));
}
