mod bucket_name;
mod content_descriptor;
mod idempotency_key;
mod ids;
mod object_key;
mod source_url;

pub use bucket_name::BucketName;
pub use content_descriptor::ContentDescriptor;
pub use idempotency_key::IdempotencyKey;
pub use ids::{DownloadId, DownloadTaskId, OutboxId, SessionId};
pub use object_key::{ObjectKey, ObjectLocation};
pub use source_url::HttpUrl;
