mod external_download_service;
mod upload_session_service;

pub use external_download_service::{
    DownloadReceipt, ExternalDownloadService, RequestDownloadCommand,
};
pub use upload_session_service::{
    MultipartUploadTicket, SingleUploadTicket, StartUploadCommand, UploadSessionService,
};
