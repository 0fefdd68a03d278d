use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{event_dispatcher::EventDispatcher, expire_strategy::ExpireStrategyRegistry};
use crate::{
    domain::{
        errors::{SessionError, SessionResult},
        value_objects::SessionId,
    },
    ports::{repositories::UploadSessionRepository, system::Clock},
};

/// Outcome of one expiry pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpirySweepReport {
    pub examined: usize,
    pub expired: Vec<SessionId>,
    /// Sessions a concurrent writer moved on first
    pub skipped: Vec<SessionId>,
    /// Sessions left ACTIVE for the next pass, with the reason
    pub failed: Vec<(SessionId, String)>,
}

/// Expires ACTIVE sessions whose TTL has run out
pub struct SessionExpirySweeper {
    sessions: Arc<dyn UploadSessionRepository>,
    registry: Arc<ExpireStrategyRegistry>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl SessionExpirySweeper {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        registry: Arc<ExpireStrategyRegistry>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            sessions,
            registry,
            dispatcher,
            clock,
            batch_size,
        }
    }

    /// An unregistered session variant aborts the pass: that is a wiring bug
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SessionResult<ExpirySweepReport> {
        let now = self.clock.now();
        let candidates = self.sessions.find_expirable(now, self.batch_size).await?;

        let mut report = ExpirySweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for mut session in candidates {
            let session_id = session.id();
            match self.registry.expire(&mut session, now).await {
                Ok(()) => {
                    info!(session_id = %session_id, kind = %session.kind(), "Upload session expired");
                    report.expired.push(session_id);
                    self.dispatcher.dispatch(session.take_events()).await;
                }
                Err(e @ SessionError::UnregisteredVariant { .. }) => return Err(e),
                Err(e) if e.is_illegal_state() || is_conflict(&e) => {
                    debug!(session_id = %session_id, error = %e, "Session changed before it could expire");
                    report.skipped.push(session_id);
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Session expiry failed, will retry");
                    report.failed.push((session_id, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}

fn is_conflict(err: &SessionError) -> bool {
    matches!(err, SessionError::Repository(e) if e.is_conflict())
}
