use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    errors::SessionResult,
    models::UploadSession,
    value_objects::{ContentDescriptor, ObjectLocation, SessionId},
};
use async_trait::async_trait;

/// Request to open an upload session
#[derive(Debug, Clone)]
pub struct StartUploadCommand {
    pub policy_id: String,
    pub uploader_id: String,
    pub descriptor: ContentDescriptor,
    pub location: ObjectLocation,
    /// Falls back to the configured default
    pub ttl: Option<Duration>,
}

/// What the client needs for a single presigned PUT
#[derive(Debug, Clone)]
pub struct SingleUploadTicket {
    pub session_id: SessionId,
    pub presigned_url: String,
    pub expires_at: DateTime<Utc>,
}

/// What the client needs for a multipart upload
#[derive(Debug, Clone)]
pub struct MultipartUploadTicket {
    pub session_id: SessionId,
    pub provider_upload_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Service port for client-initiated uploads
#[async_trait]
pub trait UploadSessionService: Send + Sync + 'static {
    /// Open a single-shot session and presign its upload URL
    async fn start_single_upload(&self, command: StartUploadCommand)
        -> SessionResult<SingleUploadTicket>;

    /// Open a multipart session backed by a provider upload
    async fn start_multipart_upload(
        &self,
        command: StartUploadCommand,
    ) -> SessionResult<MultipartUploadTicket>;

    /// Record a part the client uploaded
    async fn record_part(
        &self,
        session_id: SessionId,
        part_number: u32,
        etag: String,
        size: u64,
    ) -> SessionResult<UploadSession>;

    /// Confirm a single-shot upload, optionally checking the client's checksum
    async fn confirm_single_upload(
        &self,
        session_id: SessionId,
        provided_etag: Option<String>,
    ) -> SessionResult<UploadSession>;

    /// Complete a multipart upload with the recorded parts in order
    async fn complete_multipart(&self, session_id: SessionId) -> SessionResult<UploadSession>;

    /// Cancel an open session, aborting any provider upload first
    async fn cancel_upload(&self, session_id: SessionId) -> SessionResult<UploadSession>;

    async fn get_session(&self, session_id: SessionId) -> SessionResult<UploadSession>;
}
