use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of an upload session
    SessionId
);
uuid_id!(
    /// Identifier of an outbox row
    OutboxId
);
uuid_id!(
    /// Identifier of an external download request
    DownloadId
);
uuid_id!(
    /// Identifier of a download task
    DownloadTaskId
);

impl DownloadTaskId {
    /// A download has at most one task, so the task reuses the download's id.
    /// Redelivered registration messages therefore map onto the same task.
    pub fn for_download(download_id: DownloadId) -> Self {
        Self(download_id.as_uuid())
    }
}
