mod common;

use common::{t0, upload_command, FlakySessionRepository, RecordingStorage, ScriptedFetcher};
use ingest_outbox_server::{
    adapters::outbound::{
        messaging::{InMemoryMessageBroker, RecordingWebhookSender},
        persistence::InMemoryStore,
    },
    app::{AppBuilder, Repositories},
    domain::{errors::StorageError, models::SessionStatus, value_objects::ObjectLocation},
    ports::{
        repositories::UploadSessionRepository,
        services::UploadSessionService,
        storage::ObjectStorageClient,
        system::{Clock, ManualClock},
    },
    services::ExpireStrategyRegistry,
};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_multipart_expiry_aborts_exactly_once() {
    let t = common::test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    let ticket = t
        .app
        .uploads
        .start_multipart_upload(upload_command("stale/big.bin", 60))
        .await
        .unwrap();

    t.clock.advance(chrono::Duration::minutes(61));
    let first = t.app.expiry_sweeper.sweep().await.unwrap();
    let second = t.app.expiry_sweeper.sweep().await.unwrap();

    assert_eq!(first.expired, vec![ticket.session_id]);
    assert_eq!(second.examined, 0);
    assert_eq!(t.storage.aborts(), vec![ticket.provider_upload_id.clone()]);

    let session = t.app.uploads.get_session(ticket.session_id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Expired);
}

#[tokio::test]
async fn test_expiring_same_instance_twice_is_rejected_before_abort() {
    let t = common::test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    let ticket = t
        .app
        .uploads
        .start_multipart_upload(upload_command("twice/big.bin", 60))
        .await
        .unwrap();
    let registry = ExpireStrategyRegistry::standard(
        t.app.repositories.sessions.clone(),
        t.storage.clone(),
    );
    let mut session = t.app.uploads.get_session(ticket.session_id).await.unwrap();

    t.clock.advance(chrono::Duration::minutes(61));
    let now = t.clock.now();
    registry.expire(&mut session, now).await.unwrap();
    let err = registry.expire(&mut session, now).await.unwrap_err();

    assert!(err.is_illegal_state());
    assert_eq!(t.storage.aborts().len(), 1);
}

#[tokio::test]
async fn test_expiry_retried_after_failed_write_reuses_upload_id() {
    let store = InMemoryStore::new();
    let sessions = Arc::new(FlakySessionRepository::new(store.clone()));
    let storage = Arc::new(RecordingStorage::new());
    let clock = Arc::new(ManualClock::new(t0()));

    let mut repositories = Repositories::from_store(Arc::new(store.clone()));
    repositories.sessions = sessions.clone() as Arc<dyn UploadSessionRepository>;

    let app = AppBuilder::new()
        .with_repositories(repositories)
        .with_storage(storage.clone())
        .with_broker(Arc::new(InMemoryMessageBroker::new()))
        .with_webhooks(Arc::new(RecordingWebhookSender::new()))
        .with_fetcher(Arc::new(ScriptedFetcher::serving(b"")))
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();

    let ticket = app
        .uploads
        .start_multipart_upload(upload_command("flaky/big.bin", 60))
        .await
        .unwrap();

    clock.advance(chrono::Duration::minutes(61));
    sessions.fail_next_saves(1);
    let first = app.expiry_sweeper.sweep().await.unwrap();
    assert!(first.expired.is_empty());
    assert_eq!(first.failed.len(), 1);
    let session = app.uploads.get_session(ticket.session_id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Active);

    let second = app.expiry_sweeper.sweep().await.unwrap();
    assert_eq!(second.expired, vec![ticket.session_id]);
    let third = app.expiry_sweeper.sweep().await.unwrap();
    assert_eq!(third.examined, 0);

    let aborts = storage.aborts();
    let distinct: HashSet<&String> = aborts.iter().collect();
    assert_eq!(aborts.len(), 2);
    assert_eq!(distinct.len(), 1);
    assert!(distinct.contains(&ticket.provider_upload_id));

    let session = app.uploads.get_session(ticket.session_id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Expired);
}

#[tokio::test]
async fn test_completed_session_is_never_expired() {
    let t = common::test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    let ticket = t
        .app
        .uploads
        .start_single_upload(upload_command("done/file.txt", 60))
        .await
        .unwrap();
    t.app.uploads.cancel_upload(ticket.session_id).await.unwrap();

    t.clock.advance(chrono::Duration::hours(2));
    let report = t.app.expiry_sweeper.sweep().await.unwrap();
    assert_eq!(report.examined, 0);

    let session = t.app.uploads.get_session(ticket.session_id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_expiry_racing_completion_fails_fast() {
    let t = common::test_app(Arc::new(ScriptedFetcher::serving(b""))).await;
    let ticket = t
        .app
        .uploads
        .start_multipart_upload(upload_command("race/big.bin", 60))
        .await
        .unwrap();
    let location = ObjectLocation::parse("uploads", "race/big.bin").unwrap();
    t.storage
        .adapter()
        .upload_part(&location, &ticket.provider_upload_id, 1, Bytes::from_static(b"abc"))
        .await
        .unwrap();
    t.app
        .uploads
        .record_part(ticket.session_id, 1, "etag-1".to_string(), 3)
        .await
        .unwrap();

    // The completing request loaded the session before the sweep ran
    let mut stale = t
        .app
        .repositories
        .sessions
        .find_by_id(ticket.session_id)
        .await
        .unwrap()
        .unwrap();

    t.clock.advance(chrono::Duration::minutes(61));
    let report = t.app.expiry_sweeper.sweep().await.unwrap();
    assert_eq!(report.expired, vec![ticket.session_id]);

    let err = t
        .app
        .uploads
        .complete_multipart(ticket.session_id)
        .await
        .unwrap_err();
    assert!(err.is_illegal_state());

    // Finishing the stale copy cannot overwrite the expiry
    let multipart = stale.as_multipart_mut().unwrap();
    multipart.begin_completion().unwrap();
    multipart
        .mark_completed("late-etag".to_string(), t.clock.now())
        .unwrap();
    let err = t
        .app
        .repositories
        .sessions
        .save(&mut stale, &mut [])
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(t.storage.aborts(), vec![ticket.provider_upload_id.clone()]);
    let missing = t.storage.head_object(&location).await.unwrap_err();
    assert!(matches!(missing, StorageError::ObjectNotFound { .. }));
    let session = t.app.uploads.get_session(ticket.session_id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Expired);
}
