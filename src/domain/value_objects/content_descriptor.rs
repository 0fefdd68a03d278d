use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// What the client says it is about to upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    file_name: String,
    size: u64,
    content_type: String,
}

impl ContentDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        size: i64,
        content_type: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let file_name = file_name.into();
        let content_type = content_type.into();

        if file_name.trim().is_empty() {
            return Err(ValidationError::EmptyFileName);
        }
        if size <= 0 {
            return Err(ValidationError::NonPositiveFileSize(size));
        }
        if content_type.trim().is_empty() {
            return Err(ValidationError::EmptyContentType);
        }

        Ok(Self {
            file_name,
            size: size as u64,
            content_type,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}
