mod download_recovery;
mod download_worker;
mod event_dispatcher;
mod expire_strategy;
mod external_download_service_impl;
mod message_manager;
mod outbox_listener;
mod outbox_sweeper;
mod scheduler;
mod session_expiry_sweeper;
mod settings;
mod upload_session_service_impl;

pub use download_recovery::{DownloadRecoverySweeper, RecoveryReport};
pub use download_worker::{DownloadTaskWorker, TaskRunOutcome};
pub use event_dispatcher::EventDispatcher;
pub use expire_strategy::{
    ExpireStrategy, ExpireStrategyRegistry, MultipartSessionExpireStrategy,
    SingleSessionExpireStrategy,
};
pub use external_download_service_impl::{DownloadLifecycleListener, ExternalDownloadServiceImpl};
pub use message_manager::{OutboxMessageManager, PublishError};
pub use outbox_listener::OutboxPublishingListener;
pub use outbox_sweeper::{OutboxSweeper, SweepReport};
pub use scheduler::{Scheduler, SweepIntervals};
pub use session_expiry_sweeper::{ExpirySweepReport, SessionExpirySweeper};
pub use settings::{DownloadSettings, OutboxSettings, SessionSettings};
pub use upload_session_service_impl::UploadSessionServiceImpl;

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        models::{DomainEvent, OutboxRecord},
        value_objects::OutboxId,
    },
    ports::system::IdGenerator,
};

/// Outbox rows owed for events an aggregate is about to commit
pub(crate) fn outbox_rows_for(
    events: &[DomainEvent],
    ids: &dyn IdGenerator,
    now: DateTime<Utc>,
) -> Vec<OutboxRecord> {
    events
        .iter()
        .filter_map(|event| OutboxRecord::for_event(OutboxId::from_uuid(ids.next_id()), event, now))
        .collect()
}
