use crate::domain::{errors::StorageResult, models::CompletedPart, value_objects::ObjectLocation};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Port for the object storage provider.
///
/// Implementations must treat `abort_multipart` on an already aborted or
/// completed upload as a no-op, since expiry sweeps re-run it after a crash.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync + 'static {
    /// Presigned PUT URL the client uploads to directly
    async fn presign_upload(&self, location: &ObjectLocation, ttl: Duration) -> StorageResult<String>;

    /// Start a multipart upload; returns the provider's upload id
    async fn initiate_multipart(&self, location: &ObjectLocation) -> StorageResult<String>;

    /// Discard an in-flight multipart upload and its parts
    async fn abort_multipart(&self, location: &ObjectLocation, upload_id: &str) -> StorageResult<()>;

    /// Stitch uploaded parts together, in the order given; returns the object's etag
    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<String>;

    /// Store an object in one request; returns its etag
    async fn put_object(
        &self,
        location: &ObjectLocation,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// Provider view of a stored object
    async fn head_object(&self, location: &ObjectLocation) -> StorageResult<ObjectHead>;
}

/// Metadata the provider reports for a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub etag: Option<String>,
    pub size: u64,
}
