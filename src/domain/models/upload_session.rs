use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::events::DomainEvent;
use crate::domain::{
    errors::{SessionError, SessionResult, ValidationError},
    value_objects::{ContentDescriptor, ObjectLocation, SessionId},
};

/// Shortest TTL a session may be created with
pub const MIN_SESSION_TTL_SECONDS: i64 = 60;
/// Longest TTL a session may be created with
pub const MAX_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
/// S3 allows part numbers 1..=10000
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Lifecycle status of an upload session
///
/// Transitions only move forward:
/// `PENDING -> ACTIVE -> {COMPLETED | FAILED | CANCELLED | EXPIRED}`,
/// with `PENDING` also allowed to jump straight to COMPLETED, FAILED or CANCELLED.
/// EXPIRED is only reachable from ACTIVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Failed => "FAILED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(SessionStatus::Pending),
            "ACTIVE" => Some(SessionStatus::Active),
            "COMPLETED" => Some(SessionStatus::Completed),
            "FAILED" => Some(SessionStatus::Failed),
            "CANCELLED" => Some(SessionStatus::Cancelled),
            "EXPIRED" => Some(SessionStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Cancelled
                | SessionStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending | Active, Completed)
                | (Pending | Active, Failed)
                | (Pending | Active, Cancelled)
                | (Active, Expired)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant discriminator, used to pick the expiry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    Single,
    Multipart,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Single => "SINGLE",
            SessionKind::Multipart => "MULTIPART",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A part the client reports as uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// TTL must lie within [1 minute, 24 hours]
pub fn validate_ttl(ttl: Duration) -> Result<(), ValidationError> {
    let seconds = ttl.num_seconds();
    if (MIN_SESSION_TTL_SECONDS..=MAX_SESSION_TTL_SECONDS).contains(&seconds) {
        Ok(())
    } else {
        Err(ValidationError::TtlOutOfRange {
            actual_seconds: seconds,
            min_seconds: MIN_SESSION_TTL_SECONDS,
            max_seconds: MAX_SESSION_TTL_SECONDS,
        })
    }
}

/// Input shared by both session variants
#[derive(Debug, Clone)]
pub struct NewUploadSession {
    pub id: SessionId,
    pub policy_id: String,
    pub uploader_id: String,
    pub descriptor: ContentDescriptor,
    pub location: ObjectLocation,
    pub ttl: Duration,
    pub now: DateTime<Utc>,
}

/// State shared by every session variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCore {
    id: SessionId,
    policy_id: String,
    uploader_id: String,
    descriptor: ContentDescriptor,
    location: ObjectLocation,
    status: SessionStatus,
    etag: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl SessionCore {
    fn create(new: NewUploadSession) -> SessionResult<Self> {
        validate_ttl(new.ttl)?;

        Ok(Self {
            id: new.id,
            policy_id: new.policy_id,
            uploader_id: new.uploader_id,
            descriptor: new.descriptor,
            location: new.location,
            status: SessionStatus::Pending,
            etag: None,
            failure_reason: None,
            created_at: new.now,
            updated_at: new.now,
            expires_at: new.now + new.ttl,
            version: 0,
            events: Vec::new(),
        })
    }

    fn ensure_can(&self, next: SessionStatus, operation: &'static str) -> SessionResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(SessionError::IllegalState {
                session_id: self.id,
                status: self.status,
                operation,
            })
        }
    }

    fn transition(
        &mut self,
        next: SessionStatus,
        operation: &'static str,
        now: DateTime<Utc>,
    ) -> SessionResult<()> {
        self.ensure_can(next, operation)?;
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    fn complete(&mut self, kind: SessionKind, etag: String, now: DateTime<Utc>) -> SessionResult<()> {
        self.transition(SessionStatus::Completed, "complete", now)?;
        self.etag = Some(etag.clone());
        self.events.push(DomainEvent::UploadCompleted {
            session_id: self.id,
            kind,
            location: self.location.clone(),
            etag,
            size: self.descriptor.size(),
            content_type: self.descriptor.content_type().to_string(),
            occurred_at: now,
        });
        Ok(())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    pub fn uploader_id(&self) -> &str {
        &self.uploader_id
    }

    pub fn descriptor(&self) -> &ContentDescriptor {
        &self.descriptor
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Session for a single presigned PUT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleUploadSession {
    core: SessionCore,
}

impl SingleUploadSession {
    pub fn create(new: NewUploadSession) -> SessionResult<Self> {
        Ok(Self {
            core: SessionCore::create(new)?,
        })
    }

    /// Confirm that the client finished its direct upload.
    ///
    /// `provided_etag` is the client's checksum, if it sent one; it has to match
    /// what the provider reports for the stored object.
    pub fn confirm_completion(
        &mut self,
        provided_etag: Option<&str>,
        provider_etag: &str,
        now: DateTime<Utc>,
    ) -> SessionResult<()> {
        self.core
            .ensure_can(SessionStatus::Completed, "confirm completion of")?;

        if let Some(provided) = provided_etag {
            if normalize_etag(provided) != normalize_etag(provider_etag) {
                return Err(SessionError::ChecksumMismatch {
                    expected: provided.to_string(),
                    actual: provider_etag.to_string(),
                });
            }
        }

        self.core
            .complete(SessionKind::Single, provider_etag.to_string(), now)
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }
}

/// Session for an S3-style multipart upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadSession {
    core: SessionCore,
    provider_upload_id: String,
    parts: BTreeMap<u32, CompletedPart>,
}

impl MultipartUploadSession {
    pub fn create(new: NewUploadSession, provider_upload_id: String) -> SessionResult<Self> {
        if provider_upload_id.trim().is_empty() {
            return Err(SessionError::MissingProviderUploadId { session_id: new.id });
        }

        Ok(Self {
            core: SessionCore::create(new)?,
            provider_upload_id,
            parts: BTreeMap::new(),
        })
    }

    /// Record a part the client uploaded. The first part activates a pending session.
    pub fn add_completed_part(
        &mut self,
        part_number: u32,
        etag: impl Into<String>,
        size: u64,
        now: DateTime<Utc>,
    ) -> SessionResult<()> {
        self.core.ensure_can(SessionStatus::Completed, "add a part to")?;

        let etag = etag.into();
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(ValidationError::InvalidPartNumber(part_number).into());
        }
        if etag.trim().is_empty() {
            return Err(ValidationError::EmptyEtag.into());
        }
        if self.parts.contains_key(&part_number) {
            return Err(ValidationError::DuplicatePartNumber(part_number).into());
        }

        self.parts.insert(
            part_number,
            CompletedPart {
                part_number,
                etag,
                size,
            },
        );

        if self.core.status == SessionStatus::Pending {
            self.core.status = SessionStatus::Active;
        }
        self.core.updated_at = now;
        Ok(())
    }

    /// Check the session may be completed and return its parts ordered by part number.
    ///
    /// Runs before the provider's completion call so a terminal session never
    /// reaches the provider a second time.
    pub fn begin_completion(&self) -> SessionResult<Vec<CompletedPart>> {
        self.core.ensure_can(SessionStatus::Completed, "complete")?;

        if self.provider_upload_id.is_empty() {
            return Err(SessionError::MissingProviderUploadId {
                session_id: self.core.id,
            });
        }
        if self.parts.is_empty() {
            return Err(SessionError::NoCompletedParts {
                session_id: self.core.id,
            });
        }

        Ok(self.parts.values().cloned().collect())
    }

    /// Record the provider's successful completion
    pub fn mark_completed(&mut self, provider_etag: String, now: DateTime<Utc>) -> SessionResult<()> {
        self.core
            .complete(SessionKind::Multipart, provider_etag, now)
    }

    pub fn provider_upload_id(&self) -> &str {
        &self.provider_upload_id
    }

    pub fn parts(&self) -> impl Iterator<Item = &CompletedPart> {
        self.parts.values()
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.parts.values().map(|p| p.size).sum()
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }
}

/// An upload session of either variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadSession {
    Single(SingleUploadSession),
    Multipart(MultipartUploadSession),
}

impl UploadSession {
    pub fn kind(&self) -> SessionKind {
        match self {
            UploadSession::Single(_) => SessionKind::Single,
            UploadSession::Multipart(_) => SessionKind::Multipart,
        }
    }

    pub fn core(&self) -> &SessionCore {
        match self {
            UploadSession::Single(s) => &s.core,
            UploadSession::Multipart(m) => &m.core,
        }
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        match self {
            UploadSession::Single(s) => &mut s.core,
            UploadSession::Multipart(m) => &mut m.core,
        }
    }

    pub fn id(&self) -> SessionId {
        self.core().id
    }

    pub fn status(&self) -> SessionStatus {
        self.core().status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.core().expires_at
    }

    pub fn version(&self) -> u64 {
        self.core().version
    }

    /// Fails with IllegalState unless the session may move to `next`.
    /// Lets services reject a request before calling the provider.
    pub fn ensure_can_transition(
        &self,
        next: SessionStatus,
        operation: &'static str,
    ) -> SessionResult<()> {
        self.core().ensure_can(next, operation)
    }

    /// Whether the TTL has passed; says nothing about whether expiry is allowed
    pub fn is_past_ttl(&self, now: DateTime<Utc>) -> bool {
        now > self.core().expires_at
    }

    /// PENDING -> ACTIVE once the client holds an upload target
    pub fn activate(&mut self, now: DateTime<Utc>) -> SessionResult<()> {
        self.core_mut()
            .transition(SessionStatus::Active, "activate", now)
    }

    /// ACTIVE -> EXPIRED. Only the in-memory transition: callers run any
    /// compensating provider call before persisting the result.
    pub fn expire(&mut self, now: DateTime<Utc>) -> SessionResult<()> {
        let kind = self.kind();
        let core = self.core_mut();
        core.transition(SessionStatus::Expired, "expire", now)?;
        core.events.push(DomainEvent::UploadSessionExpired {
            session_id: core.id,
            kind,
            occurred_at: now,
        });
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> SessionResult<()> {
        let core = self.core_mut();
        core.transition(SessionStatus::Failed, "fail", now)?;
        core.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> SessionResult<()> {
        self.core_mut()
            .transition(SessionStatus::Cancelled, "cancel", now)
    }

    pub fn as_multipart(&self) -> Option<&MultipartUploadSession> {
        match self {
            UploadSession::Multipart(m) => Some(m),
            UploadSession::Single(_) => None,
        }
    }

    pub fn as_multipart_mut(&mut self) -> Option<&mut MultipartUploadSession> {
        match self {
            UploadSession::Multipart(m) => Some(m),
            UploadSession::Single(_) => None,
        }
    }

    pub fn as_single_mut(&mut self) -> Option<&mut SingleUploadSession> {
        match self {
            UploadSession::Single(s) => Some(s),
            UploadSession::Multipart(_) => None,
        }
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.core().events
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.core_mut().events)
    }

    /// Called by repositories after a successful write
    pub fn mark_persisted(&mut self) {
        self.core_mut().version += 1;
    }
}

impl From<SingleUploadSession> for UploadSession {
    fn from(session: SingleUploadSession) -> Self {
        UploadSession::Single(session)
    }
}

impl From<MultipartUploadSession> for UploadSession {
    fn from(session: MultipartUploadSession) -> Self {
        UploadSession::Multipart(session)
    }
}

/// Providers quote ETags and clients send hex digests in either case
fn normalize_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_ascii_lowercase()
}
