use std::time::Duration;

use crate::domain::models::OutboxRetryPolicy;

/// Upload session tunables
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// TTL used when a request does not name one
    pub default_ttl: Duration,
    pub expiry_batch_size: usize,
    pub expiry_interval: Duration,
    /// Attempts for a part write that loses an optimistic-concurrency race
    pub max_write_attempts: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60 * 60),
            expiry_batch_size: 100,
            expiry_interval: Duration::from_secs(60),
            max_write_attempts: 3,
        }
    }
}

/// Outbox sweep tunables
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub retry: OutboxRetryPolicy,
    pub batch_size: usize,
    pub sweep_interval: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            retry: OutboxRetryPolicy::default(),
            batch_size: 100,
            sweep_interval: Duration::from_secs(15),
        }
    }
}

/// External download tunables
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Per-task budget when a request does not carry one
    pub default_max_retries: u32,
    pub fetch_timeout: Duration,
    /// Claims held longer than this are released as failed attempts;
    /// keep it well above `fetch_timeout`
    pub claim_timeout: Duration,
    pub recovery_interval: Duration,
    pub recovery_batch_size: usize,
    /// Bucket for downloads that name no destination
    pub default_bucket: String,
    pub key_prefix: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            fetch_timeout: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(10 * 60),
            recovery_interval: Duration::from_secs(60),
            recovery_batch_size: 100,
            default_bucket: "downloads".to_string(),
            key_prefix: "external".to_string(),
        }
    }
}
