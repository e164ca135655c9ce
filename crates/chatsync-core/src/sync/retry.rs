//! Capped exponential backoff for delivery retries

use std::time::Duration;

use crate::remote::RemoteError;

/// Backoff schedule for automatic delivery retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Retries scheduled after one failed delivery before giving up
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the next retry, or `None` when no retry should be scheduled
    ///
    /// Only transient failures are retried. A server-provided `Retry-After`
    /// overrides the computed delay but is still capped.
    pub fn next_delay(&self, attempt: u32, error: &RemoteError) -> Option<Duration> {
        if attempt >= self.max_attempts || !error.is_transient() {
            return None;
        }

        match error {
            RemoteError::RateLimited {
                retry_after: Some(after),
            } => Some((*after).min(self.max_delay)),
            _ => Some(self.backoff(attempt)),
        }
    }
}
