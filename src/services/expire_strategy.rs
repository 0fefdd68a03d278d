use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{
    domain::{
        errors::{SessionError, SessionResult},
        models::{SessionKind, UploadSession},
    },
    ports::{repositories::UploadSessionRepository, storage::ObjectStorageClient},
};

/// Expiry behaviour for one session variant.
///
/// Every implementation runs the same three steps in the same order:
/// the in-memory `expire()` guard, then any compensating provider call,
/// then persistence. A crash between the last two leaves the session
/// ACTIVE in storage, and the next sweep repeats the idempotent provider call.
#[async_trait]
pub trait ExpireStrategy: Send + Sync + 'static {
    fn kind(&self) -> SessionKind;

    async fn expire(&self, session: &mut UploadSession, now: DateTime<Utc>) -> SessionResult<()>;
}

fn ensure_kind(expected: SessionKind, session: &UploadSession) -> SessionResult<()> {
    if session.kind() == expected {
        Ok(())
    } else {
        Err(SessionError::VariantMismatch {
            expected,
            actual: session.kind(),
        })
    }
}

/// Nothing to clean up at the provider: a presigned URL simply lapses
pub struct SingleSessionExpireStrategy {
    sessions: Arc<dyn UploadSessionRepository>,
}

impl SingleSessionExpireStrategy {
    pub fn new(sessions: Arc<dyn UploadSessionRepository>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ExpireStrategy for SingleSessionExpireStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::Single
    }

    async fn expire(&self, session: &mut UploadSession, now: DateTime<Utc>) -> SessionResult<()> {
        ensure_kind(self.kind(), session)?;
        session.expire(now)?;
        self.sessions.save(session, &mut []).await?;
        Ok(())
    }
}

/// Aborts the provider upload before the session is recorded as EXPIRED
pub struct MultipartSessionExpireStrategy {
    sessions: Arc<dyn UploadSessionRepository>,
    storage: Arc<dyn ObjectStorageClient>,
}

impl MultipartSessionExpireStrategy {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        storage: Arc<dyn ObjectStorageClient>,
    ) -> Self {
        Self { sessions, storage }
    }
}

#[async_trait]
impl ExpireStrategy for MultipartSessionExpireStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::Multipart
    }

    async fn expire(&self, session: &mut UploadSession, now: DateTime<Utc>) -> SessionResult<()> {
        ensure_kind(self.kind(), session)?;
        session.expire(now)?;

        if let Some(multipart) = session.as_multipart() {
            debug!(
                session_id = %session.id(),
                upload_id = multipart.provider_upload_id(),
                "Aborting provider multipart upload"
            );
            self.storage
                .abort_multipart(multipart.core().location(), multipart.provider_upload_id())
                .await?;
        }

        self.sessions.save(session, &mut []).await?;
        Ok(())
    }
}

/// Strategies keyed by session variant, built once at startup
pub struct ExpireStrategyRegistry {
    strategies: HashMap<SessionKind, Arc<dyn ExpireStrategy>>,
}

impl ExpireStrategyRegistry {
    pub fn new(strategies: impl IntoIterator<Item = Arc<dyn ExpireStrategy>>) -> Self {
        Self {
            strategies: strategies.into_iter().map(|s| (s.kind(), s)).collect(),
        }
    }

    /// One strategy for every session variant
    pub fn standard(
        sessions: Arc<dyn UploadSessionRepository>,
        storage: Arc<dyn ObjectStorageClient>,
    ) -> Self {
        Self::new([
            Arc::new(SingleSessionExpireStrategy::new(sessions.clone())) as Arc<dyn ExpireStrategy>,
            Arc::new(MultipartSessionExpireStrategy::new(sessions, storage)),
        ])
    }

    pub fn strategy_for(&self, kind: SessionKind) -> SessionResult<&Arc<dyn ExpireStrategy>> {
        self.strategies
            .get(&kind)
            .ok_or(SessionError::UnregisteredVariant { kind })
    }

    pub async fn expire(&self, session: &mut UploadSession, now: DateTime<Utc>) -> SessionResult<()> {
        self.strategy_for(session.kind())?
            .expire(session, now)
            .await
    }

    pub fn registered_kinds(&self) -> Vec<SessionKind> {
        let mut kinds: Vec<SessionKind> = self.strategies.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
