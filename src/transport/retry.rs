//! Retry policy with exponential backoff for the transport adapter.
//!
//! A [`RetryPolicy`] answers one question: after attempt `n` failed, should the
//! adapter try again, and how long should it wait first?
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = min(backoff_factor * 2^(n-1), max_backoff)
//! ```
//!
//! where `n` is the 1-indexed retry number. With the default factor of 0.5 the
//! delays are 0.5s, 1s, 2s, 4s, 8s. Delays never decrease from one retry to the next.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use paced_session::transport::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default().with_total(2);
//!
//! match policy.should_retry(1, None) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(attempt, 2);
//!         assert_eq!(delay, Duration::from_millis(500));
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{DEFAULT_BACKOFF_FACTOR, DEFAULT_RETRIES, DEFAULT_RETRY_STATUSES, MAX_BACKOFF};

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Bounded retry configuration.
///
/// # Default Values
///
/// - `total`: 5 retries (6 attempts)
/// - `backoff_factor`: 0.5
/// - `status_forcelist`: 429, 500, 502, 503, 504
/// - `max_backoff`: 120 seconds
/// - `respect_retry_after`: true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed beyond the first attempt.
    total: u32,

    /// Base multiplier for exponential backoff, in seconds.
    backoff_factor: f64,

    /// Response statuses that trigger a retry.
    status_forcelist: BTreeSet<u16>,

    /// Upper bound for a single backoff delay.
    max_backoff: Duration,

    /// Whether a `Retry-After` header on a retryable response stretches the delay.
    respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: DEFAULT_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            status_forcelist: DEFAULT_RETRY_STATUSES.iter().copied().collect(),
            max_backoff: MAX_BACKOFF,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit retry count, backoff factor and statuses.
    ///
    /// Negative or non-finite backoff factors are treated as zero.
    #[must_use]
    pub fn new(total: u32, backoff_factor: f64, statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            total,
            backoff_factor: sanitize_factor(backoff_factor),
            status_forcelist: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns a copy with a different retry count.
    #[must_use]
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    /// Returns a copy with a different backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = sanitize_factor(backoff_factor);
        self
    }

    /// Returns a copy with a different backoff cap.
    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Returns a copy that ignores or honors `Retry-After` on retryable responses.
    #[must_use]
    pub fn with_respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Retries allowed beyond the first attempt.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Total attempts including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.total.saturating_add(1)
    }

    /// Backoff factor in seconds.
    #[must_use]
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Statuses that trigger a retry.
    #[must_use]
    pub fn status_forcelist(&self) -> &BTreeSet<u16> {
        &self.status_forcelist
    }

    /// Whether `Retry-After` on a retryable response is honored.
    #[must_use]
    pub fn respects_retry_after(&self) -> bool {
        self.respect_retry_after
    }

    /// Returns true when a response with this status should be retried.
    #[must_use]
    pub fn is_retry_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16())
    }

    /// Determines whether to retry after attempt `attempt` (1-indexed) failed.
    ///
    /// `retry_after` is the server-requested wait from the failed response, if any.
    #[instrument(skip(self), fields(total = self.total))]
    pub fn should_retry(&self, attempt: u32, retry_after: Option<Duration>) -> RetryDecision {
        if attempt > self.total {
            debug!(attempt, total = self.total, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("retry budget ({}) exhausted", self.total),
            };
        }

        let mut delay = self.backoff_delay(attempt);
        if self.respect_retry_after
            && let Some(requested) = retry_after
        {
            delay = delay.max(requested);
        }

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff before retry number `retry` (1-indexed).
    ///
    /// Formula: `min(backoff_factor * 2^(retry-1), max_backoff)`
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        if self.backoff_factor <= 0.0 || retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let seconds = self.backoff_factor * 2f64.powi(exponent);
        let capped = seconds.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        0.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total(), 5);
        assert_eq!(policy.max_attempts(), 6);
        assert!((policy.backoff_factor() - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            policy.status_forcelist().iter().copied().collect::<Vec<_>>(),
            vec![429, 500, 502, 503, 504]
        );
        assert!(policy.respects_retry_after());
    }

    #[test]
    fn test_retry_policy_negative_factor_is_zero() {
        let policy = RetryPolicy::new(3, -1.0, [500]);
        assert!(policy.backoff_factor().abs() < f64::EPSILON);
        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_retry_policy_nan_factor_is_zero() {
        let policy = RetryPolicy::default().with_backoff_factor(f64::NAN);
        assert_eq!(policy.backoff_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy::default().with_max_backoff(Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(3));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_delay_never_decreases() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for retry in 1..=64 {
            let delay = policy.backoff_delay(retry);
            assert!(delay >= previous, "retry {retry}: {delay:?} < {previous:?}");
            previous = delay;
        }
    }

    #[test]
    fn test_should_retry_within_budget() {
        let policy = RetryPolicy::default().with_total(2);
        assert_eq!(
            policy.should_retry(1, None),
            RetryDecision::Retry {
                delay: Duration::from_millis(500),
                attempt: 2
            }
        );
        assert_eq!(
            policy.should_retry(2, None),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 3
            }
        );
    }

    #[test]
    fn test_should_retry_exhausted() {
        let policy = RetryPolicy::default().with_total(2);
        assert!(matches!(
            policy.should_retry(3, None),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_zero_total_never_retries() {
        let policy = RetryPolicy::default().with_total(0);
        assert!(matches!(
            policy.should_retry(1, None),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_should_retry_honors_longer_retry_after() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(1, Some(Duration::from_secs(7)));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(7),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_should_retry_keeps_backoff_when_retry_after_shorter() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(3, Some(Duration::from_millis(100)));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_secs(2),
                attempt: 4
            }
        );
    }

    #[test]
    fn test_should_retry_ignores_retry_after_when_disabled() {
        let policy = RetryPolicy::default().with_respect_retry_after(false);
        let decision = policy.should_retry(1, Some(Duration::from_secs(30)));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_millis(500),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_is_retry_status() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retry_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(policy.is_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!policy.is_retry_status(StatusCode::NOT_FOUND));
        assert!(!policy.is_retry_status(StatusCode::OK));
    }
}
