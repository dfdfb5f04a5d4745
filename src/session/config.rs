//! Session construction settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_RETRIES, DEFAULT_RETRY_STATUSES, DEFAULT_TIMEOUT, RetryPolicy,
    RetryTransport,
};

/// Default minimum gap between consecutive requests of one session.
pub const DEFAULT_MIN_REQUEST_GAP: Duration = Duration::from_millis(900);

/// What a session does with a request that failed for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Failures propagate; the first failure in a bulk operation aborts it.
    #[default]
    Raise,
    /// Failures are logged and recorded as `None`; bulk operations always complete.
    Record,
}

/// Settings fixed when a [`Session`](super::Session) is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum time between the start of two consecutive requests.
    pub min_request_gap: Duration,
    /// Retries beyond the first attempt.
    pub retries: u32,
    /// Exponential backoff factor in seconds.
    pub backoff_factor: f64,
    /// Statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
    /// Timeout applied to requests that do not set their own.
    pub timeout: Duration,
    /// Failure handling for single and bulk requests.
    pub error_policy: ErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_request_gap: DEFAULT_MIN_REQUEST_GAP,
            retries: DEFAULT_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            timeout: DEFAULT_TIMEOUT,
            error_policy: ErrorPolicy::Raise,
        }
    }
}

impl SessionConfig {
    /// Returns a copy with a different minimum request gap.
    #[must_use]
    pub fn with_min_request_gap(mut self, gap: Duration) -> Self {
        self.min_request_gap = gap;
        self
    }

    /// Returns a copy with a different retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Returns a copy with a different backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Returns a copy with a different set of retry statuses.
    #[must_use]
    pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    /// Returns a copy with a different default timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns a copy with a different error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Builds the retry policy described by this config.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            self.backoff_factor,
            self.retry_statuses.iter().copied(),
        )
    }

    /// Builds the transport adapter mounted for `http://` and `https://`.
    #[must_use]
    pub fn transport(&self) -> RetryTransport {
        RetryTransport::new(self.retry_policy(), self.timeout)
    }
}
