use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::value_objects::HttpUrl;

/// Body and declared type of a fetched file
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub data: Bytes,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("fetching {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },
}

/// Port for downloading files from external URLs
#[async_trait]
pub trait RemoteFetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &HttpUrl) -> Result<FetchedFile, FetchError>;
}
