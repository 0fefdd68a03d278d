pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;
pub mod services;

// Re-export key types for convenience

// Domain types - aggregates, events and value objects
pub use domain::{
    // Value objects
    BucketName,
    ContentDescriptor,
    // Models
    DomainEvent,
    DownloadError,
    DownloadId,
    DownloadTask,
    DownloadTaskId,
    DownloadTaskStatus,
    // Errors
    ErrorCategory,
    ExternalDownload,
    ExternalDownloadStatus,
    HttpUrl,
    IdempotencyKey,
    ObjectKey,
    ObjectLocation,
    OutboxError,
    OutboxId,
    OutboxKind,
    OutboxRecord,
    OutboxRetryPolicy,
    OutboxStatus,
    RepositoryError,
    SessionError,
    SessionId,
    SessionKind,
    SessionStatus,
    StorageError,
    UploadSession,
    ValidationError,
};

// Port types - interfaces for external systems
pub use ports::{
    Clock, DomainEventListener, ExternalDownloadService, IdGenerator, MessageBroker,
    ObjectStorageClient, OutboxRepository, RemoteFetcher, UploadSessionRepository,
    UploadSessionService, WebhookSender,
};

// Service implementations - business logic
pub use services::{
    DownloadTaskWorker, EventDispatcher, ExternalDownloadServiceImpl, OutboxMessageManager,
    OutboxSweeper, Scheduler, SessionExpirySweeper, UploadSessionServiceImpl,
};

// Application factory and configuration
pub use app::{
    AppBuilder, AppConfig, AppError, AppServices, BrokerBackend, Repositories,
    RepositoryBackend, StorageBackend, create_app_from_env, create_in_memory_app,
};

// Adapter types - infrastructure implementations
pub use adapters::outbound::{
    persistence::{InMemoryStore, SqlStore},
    storage::ObjectStoreStorageAdapter,
};

// Public facade for easy construction
pub mod prelude {
    pub use crate::{
        AppBuilder, AppServices, ExternalDownloadService, InMemoryStore,
        ObjectStoreStorageAdapter, UploadSessionService, create_in_memory_app,
    };
    pub use crate::ports::{RequestDownloadCommand, StartUploadCommand};
}
