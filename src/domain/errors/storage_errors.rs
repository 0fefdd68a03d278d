use crate::domain::value_objects::ObjectLocation;

use super::ErrorCategory;

/// Errors raised by the object storage port
#[derive(Debug, Clone)]
pub enum StorageError {
    /// Object not found
    ObjectNotFound { location: ObjectLocation },

    /// Multipart upload unknown to the provider
    UploadNotFound { upload_id: String },

    /// The adapter is bound to a different bucket
    BucketNotConfigured { bucket: String },

    /// Operation not supported by this backend
    UnsupportedOperation { operation: String, reason: String },

    /// Validation error
    ValidationError { message: String },

    /// The provider stored the object but reported no etag for it
    MissingEtag { location: ObjectLocation },

    /// Network / provider failure, safe to retry
    InfrastructureError {
        message: String,
        source: Option<String>, // Store error as string to allow Clone
    },
}

impl StorageError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::InfrastructureError { .. } | StorageError::MissingEtag { .. } => {
                ErrorCategory::TransientInfrastructure
            }
            StorageError::ValidationError { .. } => ErrorCategory::Validation,
            _ => ErrorCategory::IllegalState,
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::ObjectNotFound { location } => {
                write!(f, "Object not found: {}", location)
            }
            StorageError::UploadNotFound { upload_id } => {
                write!(f, "Multipart upload not found: {}", upload_id)
            }
            StorageError::BucketNotConfigured { bucket } => {
                write!(f, "Bucket '{}' is not served by this storage client", bucket)
            }
            StorageError::UnsupportedOperation { operation, reason } => {
                write!(f, "Unsupported operation '{}': {}", operation, reason)
            }
            StorageError::ValidationError { message } => {
                write!(f, "Validation error: {}", message)
            }
            StorageError::MissingEtag { location } => {
                write!(f, "Provider reported no etag for {}", location)
            }
            StorageError::InfrastructureError { message, .. } => {
                write!(f, "Infrastructure error: {}", message)
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
