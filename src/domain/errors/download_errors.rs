use uuid::Uuid;

use super::{ErrorCategory, RepositoryError, StorageError, ValidationError};

/// Errors raised by external downloads and download tasks
#[derive(Debug, Clone)]
pub enum DownloadError {
    /// Bad input, rejected synchronously
    Validation(ValidationError),

    /// Operation not valid for the aggregate's current status
    IllegalState {
        entity: &'static str,
        id: Uuid,
        status: String,
        operation: &'static str,
    },

    /// Aggregate does not exist
    NotFound { entity: &'static str, id: Uuid },

    /// Remote fetch failed (network, 5xx, timeout)
    Fetch { message: String },

    /// Task used its whole retry budget
    RetryBudgetExhausted {
        task_id: Uuid,
        retries: u32,
        last_error: Option<String>,
    },

    /// Object storage call failed
    Storage(StorageError),

    /// Persistence failed
    Repository(RepositoryError),
}

impl DownloadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DownloadError::Validation(_) => ErrorCategory::Validation,
            DownloadError::IllegalState { .. } | DownloadError::NotFound { .. } => {
                ErrorCategory::IllegalState
            }
            DownloadError::Fetch { .. } => ErrorCategory::TransientInfrastructure,
            DownloadError::RetryBudgetExhausted { .. } => ErrorCategory::TerminalFailure,
            DownloadError::Storage(e) => e.category(),
            DownloadError::Repository(e) => e.category(),
        }
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::Validation(e) => write!(f, "Invalid download request: {}", e),
            DownloadError::IllegalState {
                entity,
                id,
                status,
                operation,
            } => write!(
                f,
                "Cannot {} {} {} in status {}",
                operation, entity, id, status
            ),
            DownloadError::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            DownloadError::Fetch { message } => write!(f, "Remote fetch failed: {}", message),
            DownloadError::RetryBudgetExhausted {
                task_id,
                retries,
                last_error,
            } => write!(
                f,
                "Download task {} failed permanently after {} retries: {}",
                task_id,
                retries,
                last_error.as_deref().unwrap_or("unknown error")
            ),
            DownloadError::Storage(e) => write!(f, "Object storage failure: {}", e),
            DownloadError::Repository(e) => write!(f, "Download persistence failure: {}", e),
        }
    }
}

impl std::error::Error for DownloadError {}

impl From<ValidationError> for DownloadError {
    fn from(err: ValidationError) -> Self {
        DownloadError::Validation(err)
    }
}

impl From<StorageError> for DownloadError {
    fn from(err: StorageError) -> Self {
        DownloadError::Storage(err)
    }
}

impl From<RepositoryError> for DownloadError {
    fn from(err: RepositoryError) -> Self {
        DownloadError::Repository(err)
    }
}

pub type DownloadResult<T> = Result<T, DownloadError>;
