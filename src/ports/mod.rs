pub mod events;
pub mod fetcher;
pub mod messaging;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod system;

// Re-export all port traits for convenience
pub use events::DomainEventListener;
pub use fetcher::{FetchError, FetchedFile, RemoteFetcher};
pub use messaging::{
    BrokerError, BrokerMessage, MessageBroker, WebhookError, WebhookRequest, WebhookSender,
};
pub use repositories::{
    DownloadTaskRepository, ExternalDownloadRepository, OutboxRepository, UploadSessionRepository,
};
pub use services::{
    DownloadReceipt, ExternalDownloadService, MultipartUploadTicket, RequestDownloadCommand,
    SingleUploadTicket, StartUploadCommand, UploadSessionService,
};
pub use storage::{ObjectHead, ObjectStorageClient};
pub use system::{Clock, IdGenerator, ManualClock, RandomIdGenerator, SystemClock};
