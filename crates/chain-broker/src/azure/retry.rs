//! Retry policy for management API calls.

use std::time::Duration;

use reqwest::StatusCode;

/// Statuses that are safe to retry automatically.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Bounded, fixed-backoff retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default attempt bound and a custom backoff.
    #[must_use]
    pub fn with_backoff(backoff: Duration) -> Self {
        Self {
            backoff,
            ..Self::default()
        }
    }

    /// Whether a response with `status` should be retried.
    #[must_use]
    pub fn is_transient(status: StatusCode) -> bool {
        TRANSIENT_STATUSES.contains(&status.as_u16())
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Whether a send failure is worth retrying.
    pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}
