//! Backoff for failed sends and receives
use std::time::Duration;

use config::RetrySettings;

use crate::transport::TransportError;

/// Upper bound for a single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Retry policy shared by the send and receive paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failure. 0 makes every
    /// failure fatal.
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further one
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// backoff before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Delay before retrying after `err` on retry `attempt`, or `None` when
    /// the error is fatal.
    pub fn next_delay(&self, err: &TransportError, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() || attempt >= self.max_retries {
            return None;
        }
        Some(self.delay(attempt))
    }
}
