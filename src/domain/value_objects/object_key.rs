use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

use super::BucketName;

/// A validated object key inside a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    const MAX_LEN: usize = 1024;

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::EmptyObjectKey);
        }

        if value.len() > Self::MAX_LEN {
            return Err(ValidationError::ObjectKeyTooLong {
                actual: value.len(),
                max: Self::MAX_LEN,
            });
        }

        if value.starts_with('/') {
            return Err(ValidationError::ObjectKeyStartsWithSlash);
        }

        if let Some(c) = value.chars().find(|c| c.is_control()) {
            return Err(ValidationError::InvalidObjectKeyCharacter(c));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name part of the key (everything after the last '/')
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an object lives: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: BucketName,
    pub key: ObjectKey,
}

impl ObjectLocation {
    pub fn new(bucket: BucketName, key: ObjectKey) -> Self {
        Self { bucket, key }
    }

    pub fn parse(bucket: &str, key: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            bucket: BucketName::new(bucket)?,
            key: ObjectKey::new(key)?,
        })
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_validation() {
        assert!(ObjectKey::new("uploads/2026/10/photo.jpg").is_ok());
        assert_eq!(ObjectKey::new(""), Err(ValidationError::EmptyObjectKey));
        assert_eq!(
            ObjectKey::new("/absolute"),
            Err(ValidationError::ObjectKeyStartsWithSlash)
        );
        assert_eq!(
            ObjectKey::new("bad\nkey"),
            Err(ValidationError::InvalidObjectKeyCharacter('\n'))
        );
        assert!(ObjectKey::new("k".repeat(1025)).is_err());
    }

    #[test]
    fn test_file_name() {
        let key = ObjectKey::new("a/b/photo.jpg").unwrap();
        assert_eq!(key.file_name(), "photo.jpg");
        let flat = ObjectKey::new("photo.jpg").unwrap();
        assert_eq!(flat.file_name(), "photo.jpg");
    }

    #[test]
    fn test_location_display() {
        let location = ObjectLocation::parse("media", "x/y.png").unwrap();
        assert_eq!(location.to_string(), "media/x/y.png");
    }
}
