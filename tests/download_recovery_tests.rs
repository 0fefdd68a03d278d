mod common;

use common::{download_command, test_app_with_config, ScriptedFetcher, TestApp};
use ingest_outbox_server::{
    app::AppConfig,
    domain::{
        models::{DownloadTask, DownloadTaskStatus, ExternalDownloadStatus, OutboxKind},
        value_objects::{DownloadId, HttpUrl},
    },
    ports::{services::ExternalDownloadService, system::Clock},
    services::TaskRunOutcome,
};
use std::sync::Arc;
use std::time::Duration;

fn recovery_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.downloads.claim_timeout = Duration::from_secs(120);
    config
}

fn past_claim_timeout() -> chrono::Duration {
    chrono::Duration::seconds(121)
}

/// Leave the task claimed as a worker that died mid-fetch would
async fn claim_and_abandon(t: &TestApp, download_id: DownloadId) -> DownloadTask {
    let mut task = t.app.worker.ensure_task(download_id).await.unwrap();
    task.claim(t.clock.now()).unwrap();
    t.app.repositories.tasks.save(&mut task, &mut []).await.unwrap();
    task
}

#[tokio::test]
async fn test_redelivery_releases_abandoned_claim() {
    let fetcher = Arc::new(ScriptedFetcher::serving(b"data"));
    let t = test_app_with_config(recovery_config(), fetcher.clone()).await;
    let mut feed = t.broker.subscribe();

    let receipt = t
        .app
        .downloads
        .request_download(download_command("dl-crash", "https://cdn.example.com/a.bin"))
        .await
        .unwrap();
    let registration = feed.try_recv().unwrap();
    claim_and_abandon(&t, receipt.download_id).await;

    // Still within the claim timeout: the claim holder might be alive
    let early = t.app.worker.handle_message(&registration).await.unwrap();
    assert_eq!(
        early,
        Some(TaskRunOutcome::Skipped {
            status: DownloadTaskStatus::Downloading
        })
    );

    t.clock.advance(past_claim_timeout());
    let released = t.app.worker.handle_message(&registration).await.unwrap();
    assert_eq!(released, Some(TaskRunOutcome::Requeued { attempt: 1 }));

    let dispatch = feed.try_recv().unwrap();
    assert_eq!(dispatch.message_type, "QUEUE_DISPATCH");
    let outcome = t.app.worker.handle_message(&dispatch).await.unwrap();
    assert!(matches!(outcome, Some(TaskRunOutcome::Completed { size: 4, .. })));
    assert_eq!(fetcher.calls(), 1);

    let download = t.app.downloads.get_download(receipt.download_id).await.unwrap();
    assert_eq!(download.status(), ExternalDownloadStatus::Completed);
}

#[tokio::test]
async fn test_recovery_sweep_fails_download_with_dead_claim() {
    let t = test_app_with_config(recovery_config(), Arc::new(ScriptedFetcher::serving(b""))).await;

    let mut command = download_command("dl-dead", "https://cdn.example.com/a.bin");
    command.max_retries = Some(1);
    command.webhook_url = Some(HttpUrl::parse("webhookUrl", "https://hooks.example.com/done").unwrap());
    let receipt = t.app.downloads.request_download(command).await.unwrap();
    claim_and_abandon(&t, receipt.download_id).await;

    let early = t.app.recovery_sweeper.sweep().await.unwrap();
    assert_eq!(early.released_claims, 0);

    t.clock.advance(past_claim_timeout());
    let report = t.app.recovery_sweeper.sweep().await.unwrap();
    assert_eq!(report.released_claims, 1);
    assert_eq!(report.errors, 0);

    let download = t.app.downloads.get_download(receipt.download_id).await.unwrap();
    assert_eq!(download.status(), ExternalDownloadStatus::Failed);
    assert!(download.last_error().unwrap().contains("abandoned"));
    assert_eq!(t.webhooks.sent().len(), 1);

    // Nothing left to pick up
    let again = t.app.recovery_sweeper.sweep().await.unwrap();
    assert_eq!(again.released_claims, 0);
    assert!(again.finished.is_empty());
}

#[tokio::test]
async fn test_recovery_sweep_finishes_download_of_completed_task() {
    let t = test_app_with_config(recovery_config(), Arc::new(ScriptedFetcher::serving(b""))).await;

    let mut command = download_command("dl-lost", "https://cdn.example.com/a.bin");
    command.webhook_url = Some(HttpUrl::parse("webhookUrl", "https://hooks.example.com/done").unwrap());
    let receipt = t.app.downloads.request_download(command).await.unwrap();

    // Task outcome committed, but the process died before the download moved on
    let mut task = claim_and_abandon(&t, receipt.download_id).await;
    task.complete("etag-1", 4, t.clock.now()).unwrap();
    t.app.repositories.tasks.save(&mut task, &mut []).await.unwrap();

    t.clock.advance(past_claim_timeout());
    let report = t.app.recovery_sweeper.sweep().await.unwrap();
    assert_eq!(report.finished, vec![receipt.download_id]);
    assert_eq!(report.released_claims, 0);

    let download = t.app.downloads.get_download(receipt.download_id).await.unwrap();
    assert_eq!(download.status(), ExternalDownloadStatus::Completed);
    assert_eq!(download.etag(), Some("etag-1"));
    let rows = t.store.outbox_rows().await;
    assert!(rows.iter().any(|r| r.kind() == OutboxKind::Webhook));
}

#[tokio::test]
async fn test_recovery_sweep_restarts_download_without_task() {
    let fetcher = Arc::new(ScriptedFetcher::serving(b"abc"));
    let t = test_app_with_config(recovery_config(), fetcher.clone()).await;

    let receipt = t
        .app
        .downloads
        .request_download(download_command("dl-no-task", "https://cdn.example.com/a.bin"))
        .await
        .unwrap();

    // Moved to PROCESSING, then the worker died before creating the task
    let mut download = t.app.downloads.get_download(receipt.download_id).await.unwrap();
    download.start_processing(t.clock.now()).unwrap();
    t.app
        .repositories
        .downloads
        .save(&mut download, &mut [])
        .await
        .unwrap();

    t.clock.advance(past_claim_timeout());
    let report = t.app.recovery_sweeper.sweep().await.unwrap();
    assert_eq!(report.restarted, vec![receipt.download_id]);
    assert_eq!(fetcher.calls(), 1);

    let download = t.app.downloads.get_download(receipt.download_id).await.unwrap();
    assert_eq!(download.status(), ExternalDownloadStatus::Completed);
}
