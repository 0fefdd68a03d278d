mod download_task_repository;
mod external_download_repository;
mod outbox_repository;
mod upload_session_repository;

pub use download_task_repository::DownloadTaskRepository;
pub use external_download_repository::ExternalDownloadRepository;
pub use outbox_repository::OutboxRepository;
pub use upload_session_repository::UploadSessionRepository;
