use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// A bucket name following S3 naming rules
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketName(String);

impl BucketName {
    const MIN_LEN: usize = 3;
    const MAX_LEN: usize = 63;

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&value.len()) {
            return Err(ValidationError::BucketNameLength {
                actual: value.len(),
                min: Self::MIN_LEN,
                max: Self::MAX_LEN,
            });
        }

        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !edge_ok(value.chars().next()) || !edge_ok(value.chars().last()) {
            return Err(ValidationError::BucketNameInvalidEdge);
        }

        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(ValidationError::BucketNameInvalidCharacter(c));
        }

        if value.contains("--") {
            return Err(ValidationError::BucketNameConsecutiveHyphens);
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_s3_style_names() {
        assert!(BucketName::new("uploads").is_ok());
        assert!(BucketName::new("tenant-42-media").is_ok());
        assert!(BucketName::new("123bucket").is_ok());
    }

    #[test]
    fn test_rejects_invalid_names() {
        assert!(matches!(
            BucketName::new("ab"),
            Err(ValidationError::BucketNameLength { .. })
        ));
        assert!(BucketName::new("a".repeat(64)).is_err());
        assert_eq!(
            BucketName::new("-uploads"),
            Err(ValidationError::BucketNameInvalidEdge)
        );
        assert_eq!(
            BucketName::new("Uploads"),
            Err(ValidationError::BucketNameInvalidEdge)
        );
        assert_eq!(
            BucketName::new("my_bucket"),
            Err(ValidationError::BucketNameInvalidCharacter('_'))
        );
        assert_eq!(
            BucketName::new("my--bucket"),
            Err(ValidationError::BucketNameConsecutiveHyphens)
        );
    }
}
