use serde::{Deserialize, Serialize};

use crate::domain::errors::ValidationError;

/// An absolute http(s) URL: download source, webhook or callback target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HttpUrl(String);

impl HttpUrl {
    pub fn parse(field: &str, value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let invalid = || ValidationError::InvalidUrl {
            field: field.to_string(),
            value: value.clone(),
        };

        let rest = value
            .strip_prefix("https://")
            .or_else(|| value.strip_prefix("http://"))
            .ok_or_else(invalid)?;

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used as a fallback file name
    pub fn file_name(&self) -> Option<&str> {
        let path = self.0.split(['?', '#']).next()?;
        let after_scheme = path.split_once("://")?.1;
        let (_, path) = after_scheme.split_once('/')?;
        path.rsplit('/').next().filter(|s| !s.is_empty())
    }
}

impl std::fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_http_and_https() {
        assert!(HttpUrl::parse("sourceUrl", "https://x/a.jpg").is_ok());
        assert!(HttpUrl::parse("sourceUrl", "http://cdn.example.com/img?size=2").is_ok());
    }

    #[test]
    fn test_rejects_other_schemes_and_missing_host() {
        assert!(HttpUrl::parse("sourceUrl", "ftp://x/a.jpg").is_err());
        assert!(HttpUrl::parse("sourceUrl", "https:///a.jpg").is_err());
        assert!(HttpUrl::parse("sourceUrl", "a.jpg").is_err());
    }

    #[test]
    fn test_file_name() {
        let url = HttpUrl::parse("sourceUrl", "https://x/images/a.jpg?v=1").unwrap();
        assert_eq!(url.file_name(), Some("a.jpg"));
        let bare = HttpUrl::parse("sourceUrl", "https://x").unwrap();
        assert_eq!(bare.file_name(), None);
    }
}
