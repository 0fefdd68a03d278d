use chrono::{DateTime, Utc};
use std::time::Duration;

use super::outbox::{OutboxKind, OutboxRecord, OutboxStatus};

/// When the outbox sweep may re-attempt a row, and when it gives up.
///
/// Backoff is capped exponential: `delay(n) = min(base * 2^(n-1), max)`
/// where `n` is the row's retry count. PENDING rows wait out `pending_grace`
/// so the commit-time listener gets the first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub pending_grace: Duration,
    pub max_retries: u32,
    /// Budget for HTTP-routed kinds (webhooks, callbacks)
    pub webhook_max_retries: u32,
}

impl Default for OutboxRetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            pending_grace: Duration::from_secs(60),
            max_retries: 5,
            webhook_max_retries: 8,
        }
    }
}

impl OutboxRetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return self.pending_grace;
        }
        // 2^20 * base is already far past any sensible cap
        let exponent = (retry_count - 1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn max_retries_for(&self, kind: OutboxKind) -> u32 {
        if kind.is_http() {
            self.webhook_max_retries
        } else {
            self.max_retries
        }
    }

    pub fn next_attempt_at(&self, record: &OutboxRecord) -> DateTime<Utc> {
        record.updated_at() + to_chrono(self.delay_for(record.retry_count()))
    }

    pub fn is_exhausted(&self, record: &OutboxRecord) -> bool {
        record.status() == OutboxStatus::Failed
            && record.retry_count() >= self.max_retries_for(record.kind())
    }

    pub fn is_due(&self, record: &OutboxRecord, now: DateTime<Utc>) -> bool {
        record.status() != OutboxStatus::Published
            && !self.is_exhausted(record)
            && self.next_attempt_at(record) <= now
    }

    /// Upper bound on how long a notification may keep being retried,
    /// counting every backoff step of the given kind's budget.
    pub fn worst_case_latency(&self, kind: OutboxKind) -> Duration {
        (0..self.max_retries_for(kind))
            .map(|n| self.delay_for(n))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    // Durations past a century are configuration errors; clamp instead of panicking
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
