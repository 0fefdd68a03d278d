use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::domain::{
    errors::{DownloadError, DownloadResult, ValidationError},
    value_objects::{DownloadId, DownloadTaskId, HttpUrl, ObjectLocation},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadTaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadTaskStatus::Pending => "PENDING",
            DownloadTaskStatus::Downloading => "DOWNLOADING",
            DownloadTaskStatus::Completed => "COMPLETED",
            DownloadTaskStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DownloadTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a failed attempt led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to PENDING; `attempt` is the retry count after this failure
    Requeued { attempt: u32 },
    /// Budget used up; the task is dead
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct NewDownloadTask {
    pub download_id: DownloadId,
    pub source_url: HttpUrl,
    pub destination: ObjectLocation,
    pub tags: Vec<String>,
    pub callback_url: Option<HttpUrl>,
    pub max_retries: u32,
}

/// The fetch of one external file, with its own retry budget.
///
/// `retry_count <= max_retries` always holds; a FAILED task whose count
/// reached the budget is dead and is never re-queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    id: DownloadTaskId,
    download_id: DownloadId,
    source_url: HttpUrl,
    destination: ObjectLocation,
    tags: Vec<String>,
    status: DownloadTaskStatus,
    retry_count: u32,
    max_retries: u32,
    callback_url: Option<HttpUrl>,
    last_error: Option<String>,
    etag: Option<String>,
    size: Option<u64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl DownloadTask {
    pub fn create(new: NewDownloadTask, now: DateTime<Utc>) -> DownloadResult<Self> {
        if new.max_retries == 0 {
            return Err(ValidationError::InvalidMaxRetries(0).into());
        }

        Ok(Self {
            id: DownloadTaskId::for_download(new.download_id),
            download_id: new.download_id,
            source_url: new.source_url,
            destination: new.destination,
            tags: new.tags,
            status: DownloadTaskStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            callback_url: new.callback_url,
            last_error: None,
            etag: None,
            size: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
            events: Vec::new(),
        })
    }

    /// PENDING -> DOWNLOADING
    pub fn claim(&mut self, now: DateTime<Utc>) -> DownloadResult<()> {
        if self.is_dead() {
            return Err(DownloadError::RetryBudgetExhausted {
                task_id: self.id.as_uuid(),
                retries: self.retry_count,
                last_error: self.last_error.clone(),
            });
        }
        if self.status != DownloadTaskStatus::Pending {
            return Err(self.illegal("claim"));
        }
        self.status = DownloadTaskStatus::Downloading;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// DOWNLOADING -> COMPLETED
    pub fn complete(&mut self, etag: impl Into<String>, size: u64, now: DateTime<Utc>) -> DownloadResult<()> {
        if self.status != DownloadTaskStatus::Downloading {
            return Err(self.illegal("complete"));
        }
        let etag = etag.into();
        self.status = DownloadTaskStatus::Completed;
        self.etag = Some(etag.clone());
        self.size = Some(size);
        self.completed_at = Some(now);
        self.updated_at = now;
        self.events.push(DomainEvent::DownloadTaskCompleted {
            task_id: self.id,
            download_id: self.download_id,
            location: self.destination.clone(),
            etag,
            size,
            callback_url: self.callback_url.clone(),
            occurred_at: now,
        });
        Ok(())
    }

    /// DOWNLOADING -> PENDING while budget remains, else -> FAILED for good
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> DownloadResult<FailureOutcome> {
        if self.status != DownloadTaskStatus::Downloading {
            return Err(self.illegal("fail"));
        }
        let error = error.into();
        self.retry_count += 1;
        self.last_error = Some(error.clone());
        self.updated_at = now;

        if self.retry_count < self.max_retries {
            self.status = DownloadTaskStatus::Pending;
            self.events.push(DomainEvent::DownloadTaskRequeued {
                task_id: self.id,
                download_id: self.download_id,
                attempt: self.retry_count,
                last_error: error,
                occurred_at: now,
            });
            Ok(FailureOutcome::Requeued {
                attempt: self.retry_count,
            })
        } else {
            self.status = DownloadTaskStatus::Failed;
            self.completed_at = Some(now);
            self.events.push(DomainEvent::DownloadTaskExhausted {
                task_id: self.id,
                download_id: self.download_id,
                retries: self.retry_count,
                last_error: error,
                callback_url: self.callback_url.clone(),
                occurred_at: now,
            });
            Ok(FailureOutcome::Exhausted)
        }
    }

    /// A DOWNLOADING claim untouched since `claimed_before` was abandoned by its worker
    pub fn is_stale_claim(&self, claimed_before: DateTime<Utc>) -> bool {
        self.status == DownloadTaskStatus::Downloading && self.updated_at <= claimed_before
    }

    pub fn is_dead(&self) -> bool {
        self.status == DownloadTaskStatus::Failed && self.retry_count >= self.max_retries
    }

    fn illegal(&self, operation: &'static str) -> DownloadError {
        DownloadError::IllegalState {
            entity: "download task",
            id: self.id.as_uuid(),
            status: self.status.to_string(),
            operation,
        }
    }

    pub fn id(&self) -> DownloadTaskId {
        self.id
    }

    pub fn download_id(&self) -> DownloadId {
        self.download_id
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

    pub fn status(&self) -> DownloadTaskStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn callback_url(&self) -> Option<&HttpUrl> {
        self.callback_url.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
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

    fn task(max_retries: u32) -> DownloadTask {
        DownloadTask::create(
            NewDownloadTask {
                download_id: DownloadId::from_uuid(Uuid::new_v4()),
                source_url: HttpUrl::parse("sourceUrl", "https://x/a.jpg").unwrap(),
                destination: ObjectLocation::parse("downloads", "x/a.jpg").unwrap(),
                tags: vec!["image".into()],
                callback_url: Some(HttpUrl::parse("callbackUrl", "https://cb.example.com/done").unwrap()),
                max_retries,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_task_id_follows_download_id() {
        let t = task(3);
        assert_eq!(t.id().as_uuid(), t.download_id().as_uuid());
        assert_eq!(t.status(), DownloadTaskStatus::Pending);
    }

    #[test]
    fn test_budget_exhaustion_makes_task_dead() {
        let mut t = task(3);
        for attempt in 1..3 {
            t.claim(Utc::now()).unwrap();
            assert_eq!(
                t.fail("503", Utc::now()).unwrap(),
                FailureOutcome::Requeued { attempt }
            );
            assert_eq!(t.status(), DownloadTaskStatus::Pending);
        }

        t.claim(Utc::now()).unwrap();
        assert_eq!(t.fail("timeout", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert_eq!(t.status(), DownloadTaskStatus::Failed);
        assert_eq!(t.retry_count(), t.max_retries());
        assert_eq!(t.last_error(), Some("timeout"));
        assert!(t.is_dead());

        assert!(matches!(
            t.claim(Utc::now()),
            Err(DownloadError::RetryBudgetExhausted { retries: 3, .. })
        ));
        assert_eq!(t.retry_count(), 3);

        let events = t.take_events();
        let requeues = events
            .iter()
            .filter(|e| matches!(e, DomainEvent::DownloadTaskRequeued { .. }))
            .count();
        assert_eq!(requeues, 2);
        assert!(matches!(
            events.last(),
            Some(DomainEvent::DownloadTaskExhausted { retries: 3, .. })
        ));
    }

    #[test]
    fn test_single_attempt_budget() {
        let mut t = task(1);
        t.claim(Utc::now()).unwrap();
        assert_eq!(t.fail("404", Utc::now()).unwrap(), FailureOutcome::Exhausted);
        assert!(t.is_dead());
    }

    #[test]
    fn test_complete_requires_claim() {
        let mut t = task(2);
        assert!(t.complete("e", 10, Utc::now()).is_err());
        t.claim(Utc::now()).unwrap();
        assert!(t.claim(Utc::now()).is_err());
        t.complete("e", 10, Utc::now()).unwrap();
        assert_eq!(t.status(), DownloadTaskStatus::Completed);
        assert_eq!(t.size(), Some(10));
        assert!(t.fail("late", Utc::now()).is_err());
    }

    #[test]
    fn test_only_old_claims_are_stale() {
        let mut t = task(2);
        let claimed_at = Utc::now();
        assert!(!t.is_stale_claim(claimed_at));

        t.claim(claimed_at).unwrap();
        assert!(t.is_stale_claim(claimed_at));
        assert!(!t.is_stale_claim(claimed_at - chrono::Duration::seconds(1)));

        t.complete("e", 1, claimed_at).unwrap();
        assert!(!t.is_stale_claim(claimed_at + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let err = DownloadTask::create(
            NewDownloadTask {
                download_id: DownloadId::from_uuid(Uuid::new_v4()),
                source_url: HttpUrl::parse("sourceUrl", "https://x/a.jpg").unwrap(),
                destination: ObjectLocation::parse("downloads", "a.jpg").unwrap(),
                tags: vec![],
                callback_url: None,
                max_retries: 0,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DownloadError::Validation(_)));
    }
}
