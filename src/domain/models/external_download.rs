use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::domain::{
    errors::{DownloadError, DownloadResult, ValidationError},
    value_objects::{DownloadId, HttpUrl, IdempotencyKey, ObjectLocation},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalDownloadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExternalDownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalDownloadStatus::Pending => "PENDING",
            ExternalDownloadStatus::Processing => "PROCESSING",
            ExternalDownloadStatus::Completed => "COMPLETED",
            ExternalDownloadStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExternalDownloadStatus::Completed | ExternalDownloadStatus::Failed
        )
    }
}

impl std::fmt::Display for ExternalDownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated input for a new download request
#[derive(Debug, Clone)]
pub struct NewExternalDownload {
    pub id: DownloadId,
    pub idempotency_key: IdempotencyKey,
    pub source_url: HttpUrl,
    pub destination: ObjectLocation,
    pub tags: Vec<String>,
    pub webhook_url: Option<HttpUrl>,
    pub callback_url: Option<HttpUrl>,
    pub max_retries: u32,
}

/// A server-initiated fetch of a file from an external URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDownload {
    id: DownloadId,
    idempotency_key: IdempotencyKey,
    source_url: HttpUrl,
    destination: ObjectLocation,
    tags: Vec<String>,
    webhook_url: Option<HttpUrl>,
    callback_url: Option<HttpUrl>,
    max_retries: u32,
    status: ExternalDownloadStatus,
    etag: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl ExternalDownload {
    pub fn request(new: NewExternalDownload, now: DateTime<Utc>) -> DownloadResult<Self> {
        if new.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries(new.max_retries).into());
        }

        let event = DomainEvent::ExternalDownloadRegistered {
            download_id: new.id,
            source_url: new.source_url.clone(),
            destination: new.destination.clone(),
            tags: new.tags.clone(),
            occurred_at: now,
        };

        Ok(Self {
            id: new.id,
            idempotency_key: new.idempotency_key,
            source_url: new.source_url,
            destination: new.destination,
            tags: new.tags,
            webhook_url: new.webhook_url,
            callback_url: new.callback_url,
            max_retries: new.max_retries,
            status: ExternalDownloadStatus::Pending,
            etag: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
            events: vec![event],
        })
    }

    /// PENDING -> PROCESSING once a worker picked the download up
    pub fn start_processing(&mut self, now: DateTime<Utc>) -> DownloadResult<()> {
        if self.status != ExternalDownloadStatus::Pending {
            return Err(self.illegal("start processing"));
        }
        self.status = ExternalDownloadStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// The file landed in storage
    pub fn complete(&mut self, etag: impl Into<String>, now: DateTime<Utc>) -> DownloadResult<()> {
        if self.status.is_terminal() {
            return Err(self.illegal("complete"));
        }
        let etag = etag.into();
        self.status = ExternalDownloadStatus::Completed;
        self.etag = Some(etag.clone());
        self.updated_at = now;
        self.events.push(DomainEvent::ExternalDownloadFinished {
            download_id: self.id,
            status: self.status,
            webhook_url: self.webhook_url.clone(),
            location: Some(self.destination.clone()),
            etag: Some(etag),
            error: None,
            occurred_at: now,
        });
        Ok(())
    }

    /// The download task gave up
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DownloadResult<()> {
        if self.status.is_terminal() {
            return Err(self.illegal("fail"));
        }
        let error = error.into();
        self.status = ExternalDownloadStatus::Failed;
        self.last_error = Some(error.clone());
        self.updated_at = now;
        self.events.push(DomainEvent::ExternalDownloadFinished {
            download_id: self.id,
            status: self.status,
            webhook_url: self.webhook_url.clone(),
            location: None,
            etag: None,
            error: Some(error),
            occurred_at: now,
        });
        Ok(())
    }

    fn illegal(&self, operation: &'static str) -> DownloadError {
        DownloadError::IllegalState {
            entity: "external download",
            id: self.id.as_uuid(),
            status: self.status.to_string(),
            operation,
        }
    }

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn source_url(&self) -> &HttpUrl {
        &self.source_url
    }

    pub fn destination(&self) -> &ObjectLocation {
        &self.destination
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn webhook_url(&self) -> Option<&HttpUrl> {
        self.webhook_url.as_ref()
    }

    pub fn callback_url(&self) -> Option<&HttpUrl> {
        self.callback_url.as_ref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn status(&self) -> ExternalDownloadStatus {
        self.status
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn mark_persisted(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_download(webhook: Option<&str>) -> NewExternalDownload {
        NewExternalDownload {
            id: DownloadId::from_uuid(Uuid::new_v4()),
            idempotency_key: IdempotencyKey::new("K1").unwrap(),
            source_url: HttpUrl::parse("sourceUrl", "https://x/a.jpg").unwrap(),
            destination: ObjectLocation::parse("downloads", "x/a.jpg").unwrap(),
            tags: vec![],
            webhook_url: webhook.map(|w| HttpUrl::parse("webhookUrl", w).unwrap()),
            callback_url: None,
            max_retries: 3,
        }
    }

    #[test]
    fn test_request_is_pending_and_emits_registration() {
        let mut download = ExternalDownload::request(new_download(None), Utc::now()).unwrap();
        assert_eq!(download.status(), ExternalDownloadStatus::Pending);
        let events = download.take_events();
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::ExternalDownloadRegistered { .. }]
        ));
    }

    #[test]
    fn test_request_rejects_zero_retries() {
        let mut new = new_download(None);
        new.max_retries = 0;
        assert!(matches!(
            ExternalDownload::request(new, Utc::now()),
            Err(DownloadError::Validation(ValidationError::InvalidMaxRetries(0)))
        ));
    }

    #[test]
    fn test_finish_carries_webhook_target() {
        let mut download =
            ExternalDownload::request(new_download(Some("https://hooks.example.com/in")), Utc::now())
                .unwrap();
        download.take_events();
        download.start_processing(Utc::now()).unwrap();
        download.complete("etag-1", Utc::now()).unwrap();

        match download.take_events().as_slice() {
            [DomainEvent::ExternalDownloadFinished {
                webhook_url: Some(url),
                status: ExternalDownloadStatus::Completed,
                ..
            }] => assert_eq!(url.as_str(), "https://hooks.example.com/in"),
            other => panic!("unexpected events: {:?}", other),
        }

        assert!(download.fail("late", Utc::now()).is_err());
    }
}
