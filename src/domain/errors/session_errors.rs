use crate::domain::{
    models::{SessionKind, SessionStatus},
    value_objects::SessionId,
};

use super::{ErrorCategory, RepositoryError, StorageError, ValidationError};

/// Errors raised by upload session operations
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Bad input, rejected synchronously
    Validation(ValidationError),

    /// Operation not valid for the session's current status
    IllegalState {
        session_id: SessionId,
        status: SessionStatus,
        operation: &'static str,
    },

    /// Client checksum differs from the provider-reported one
    ChecksumMismatch { expected: String, actual: String },

    /// Multipart operation on a session without a provider upload id
    MissingProviderUploadId { session_id: SessionId },

    /// Multipart completion requested before any part was recorded
    NoCompletedParts { session_id: SessionId },

    /// No expiry strategy registered for this session variant
    UnregisteredVariant { kind: SessionKind },

    /// A strategy was handed a session of another variant
    VariantMismatch {
        expected: SessionKind,
        actual: SessionKind,
    },

    /// Session does not exist
    NotFound { session_id: SessionId },

    /// Object storage call failed
    Storage(StorageError),

    /// Persistence failed
    Repository(RepositoryError),
}

impl SessionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Validation(_) | SessionError::ChecksumMismatch { .. } => {
                ErrorCategory::Validation
            }
            SessionError::IllegalState { .. }
            | SessionError::MissingProviderUploadId { .. }
            | SessionError::NoCompletedParts { .. }
            | SessionError::UnregisteredVariant { .. }
            | SessionError::VariantMismatch { .. }
            | SessionError::NotFound { .. } => ErrorCategory::IllegalState,
            SessionError::Storage(e) => e.category(),
            SessionError::Repository(e) => e.category(),
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        self.category() == ErrorCategory::IllegalState
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Validation(e) => write!(f, "Invalid upload session input: {}", e),
            SessionError::IllegalState {
                session_id,
                status,
                operation,
            } => write!(
                f,
                "Cannot {} upload session {} in status {}",
                operation, session_id, status
            ),
            SessionError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: client supplied {}, provider reported {}",
                expected, actual
            ),
            SessionError::MissingProviderUploadId { session_id } => write!(
                f,
                "Upload session {} has no provider multipart upload id",
                session_id
            ),
            SessionError::NoCompletedParts { session_id } => write!(
                f,
                "Upload session {} has no completed parts",
                session_id
            ),
            SessionError::UnregisteredVariant { kind } => {
                write!(f, "No expire strategy registered for {} sessions", kind)
            }
            SessionError::VariantMismatch { expected, actual } => write!(
                f,
                "Expire strategy for {} sessions received a {} session",
                expected, actual
            ),
            SessionError::NotFound { session_id } => {
                write!(f, "Upload session not found: {}", session_id)
            }
            SessionError::Storage(e) => write!(f, "Object storage failure: {}", e),
            SessionError::Repository(e) => write!(f, "Session persistence failure: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ValidationError> for SessionError {
    fn from(err: ValidationError) -> Self {
        SessionError::Validation(err)
    }
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Storage(err)
    }
}

impl From<RepositoryError> for SessionError {
    fn from(err: RepositoryError) -> Self {
        SessionError::Repository(err)
    }
}

/// Result type for upload session operations
pub type SessionResult<T> = Result<T, SessionError>;
