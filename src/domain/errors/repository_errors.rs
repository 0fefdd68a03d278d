use super::ErrorCategory;

/// Errors raised by persistence adapters
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryError {
    /// Optimistic concurrency check failed: somebody else wrote the row first
    Conflict {
        entity: &'static str,
        id: String,
        expected_version: u64,
    },

    /// A unique key (idempotency key, primary key) is already taken
    DuplicateKey { entity: &'static str, key: String },

    /// Row could not be mapped to or from its stored form
    Serialization { message: String },

    /// Database unreachable or statement failed
    Database { message: String },
}

impl RepositoryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Conflict { .. } | RepositoryError::DuplicateKey { .. } => {
                ErrorCategory::IllegalState
            }
            RepositoryError::Serialization { .. } => ErrorCategory::TerminalFailure,
            RepositoryError::Database { .. } => ErrorCategory::TransientInfrastructure,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Conflict { .. })
    }
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Conflict {
                entity,
                id,
                expected_version,
            } => write!(
                f,
                "Concurrent modification of {} '{}' (expected version {})",
                entity, id, expected_version
            ),
            RepositoryError::DuplicateKey { entity, key } => {
                write!(f, "Duplicate key for {}: {}", entity, key)
            }
            RepositoryError::Serialization { message } => {
                write!(f, "Serialization error: {}", message)
            }
            RepositoryError::Database { message } => write!(f, "Database error: {}", message),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization {
            message: err.to_string(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
