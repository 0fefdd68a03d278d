use crate::domain::{models::OutboxStatus, value_objects::OutboxId};

use super::{ErrorCategory, RepositoryError};

/// Errors raised by outbox lifecycle transitions
#[derive(Debug, Clone)]
pub enum OutboxError {
    /// Transition not valid for the row's current status
    IllegalState {
        outbox_id: OutboxId,
        status: OutboxStatus,
        operation: &'static str,
    },

    /// Persistence failed
    Repository(RepositoryError),
}

impl OutboxError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OutboxError::IllegalState { .. } => ErrorCategory::IllegalState,
            OutboxError::Repository(e) => e.category(),
        }
    }
}

impl std::fmt::Display for OutboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxError::IllegalState {
                outbox_id,
                status,
                operation,
            } => write!(
                f,
                "Cannot {} outbox row {} in status {}",
                operation, outbox_id, status
            ),
            OutboxError::Repository(e) => write!(f, "Outbox persistence failure: {}", e),
        }
    }
}

impl std::error::Error for OutboxError {}

impl From<RepositoryError> for OutboxError {
    fn from(err: RepositoryError) -> Self {
        OutboxError::Repository(err)
    }
}

pub type OutboxResult<T> = Result<T, OutboxError>;
