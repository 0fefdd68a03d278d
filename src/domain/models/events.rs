use chrono::{DateTime, Utc};

use super::{external_download::ExternalDownloadStatus, upload_session::SessionKind};
use crate::domain::value_objects::{DownloadId, DownloadTaskId, HttpUrl, ObjectLocation, SessionId};

/// Facts recorded by aggregates during a state transition.
///
/// Aggregates collect these in memory; services drain and dispatch them
/// only after the transaction that produced them has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    UploadCompleted {
        session_id: SessionId,
        kind: SessionKind,
        location: ObjectLocation,
        etag: String,
        size: u64,
        content_type: String,
        occurred_at: DateTime<Utc>,
    },
    UploadSessionExpired {
        session_id: SessionId,
        kind: SessionKind,
        occurred_at: DateTime<Utc>,
    },
    ExternalDownloadRegistered {
        download_id: DownloadId,
        source_url: HttpUrl,
        destination: ObjectLocation,
        tags: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    ExternalDownloadFinished {
        download_id: DownloadId,
        status: ExternalDownloadStatus,
        webhook_url: Option<HttpUrl>,
        location: Option<ObjectLocation>,
        etag: Option<String>,
        error: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    DownloadTaskRequeued {
        task_id: DownloadTaskId,
        download_id: DownloadId,
        attempt: u32,
        last_error: String,
        occurred_at: DateTime<Utc>,
    },
    DownloadTaskCompleted {
        task_id: DownloadTaskId,
        download_id: DownloadId,
        location: ObjectLocation,
        etag: String,
        size: u64,
        callback_url: Option<HttpUrl>,
        occurred_at: DateTime<Utc>,
    },
    DownloadTaskExhausted {
        task_id: DownloadTaskId,
        download_id: DownloadId,
        retries: u32,
        last_error: String,
        callback_url: Option<HttpUrl>,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::UploadCompleted { .. } => "upload.completed",
            DomainEvent::UploadSessionExpired { .. } => "upload.session_expired",
            DomainEvent::ExternalDownloadRegistered { .. } => "download.registered",
            DomainEvent::ExternalDownloadFinished { .. } => "download.finished",
            DomainEvent::DownloadTaskRequeued { .. } => "download_task.requeued",
            DomainEvent::DownloadTaskCompleted { .. } => "download_task.completed",
            DomainEvent::DownloadTaskExhausted { .. } => "download_task.exhausted",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::UploadCompleted { occurred_at, .. }
            | DomainEvent::UploadSessionExpired { occurred_at, .. }
            | DomainEvent::ExternalDownloadRegistered { occurred_at, .. }
            | DomainEvent::ExternalDownloadFinished { occurred_at, .. }
            | DomainEvent::DownloadTaskRequeued { occurred_at, .. }
            | DomainEvent::DownloadTaskCompleted { occurred_at, .. }
            | DomainEvent::DownloadTaskExhausted { occurred_at, .. } => *occurred_at,
        }
    }
}
