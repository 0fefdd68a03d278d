pub mod download_task;
pub mod events;
pub mod external_download;
pub mod outbox;
pub mod retry_policy;
pub mod upload_session;

pub use download_task::{DownloadTask, DownloadTaskStatus, FailureOutcome, NewDownloadTask};
pub use events::DomainEvent;
pub use external_download::{ExternalDownload, ExternalDownloadStatus, NewExternalDownload};
pub use outbox::{OutboxKind, OutboxPayload, OutboxRecord, OutboxStatus};
pub use retry_policy::OutboxRetryPolicy;
pub use upload_session::{
    CompletedPart, MultipartUploadSession, NewUploadSession, SessionCore, SessionKind,
    SessionStatus, SingleUploadSession, UploadSession, MAX_PART_NUMBER, MAX_SESSION_TTL_SECONDS,
    MIN_SESSION_TTL_SECONDS, validate_ttl,
};
