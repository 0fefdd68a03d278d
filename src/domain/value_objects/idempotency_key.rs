use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// Client-supplied token that deduplicates logically identical requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    const MAX_LEN: usize = 128;

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(ValidationError::EmptyIdempotencyKey);
        }

        if value.len() > Self::MAX_LEN {
            return Err(ValidationError::IdempotencyKeyTooLong {
                actual: value.len(),
                max: Self::MAX_LEN,
            });
        }

        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
        {
            return Err(ValidationError::InvalidIdempotencyKeyCharacter(c));
        }

        Ok(Self(value))
    }

    /// Key for an outbox row derived from its owner, e.g. `webhook:<download id>`
    pub fn derived(prefix: &str, owner: impl std::fmt::Display) -> Self {
        Self(format!("{}:{}", prefix, owner))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_accepts() {
        let key = IdempotencyKey::new("  K1 ").unwrap();
        assert_eq!(key.as_str(), "K1");
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert_eq!(
            IdempotencyKey::new("   "),
            Err(ValidationError::EmptyIdempotencyKey)
        );
        assert_eq!(
            IdempotencyKey::new("a b"),
            Err(ValidationError::InvalidIdempotencyKeyCharacter(' '))
        );
        assert!(IdempotencyKey::new("k".repeat(129)).is_err());
    }
}
