//! Request pacing and server rate-limit tracking for a session.
//!
//! This module provides the [`PacingController`], which decides how long a
//! session must wait before its next request may go out. Three things can
//! force a wait:
//!
//! 1. The minimum gap between consecutive requests from the same session.
//! 2. An exhausted server quota (`X-RateLimit-Remaining: 0`), held until the
//!    window advertised by `X-RateLimit-Reset` has passed.
//! 3. A `Retry-After` header seen on an earlier response.
//!
//! Each session owns its own controller; pacing state is never shared across
//! sessions.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use paced_session::pacing::PacingController;
//!
//! # async fn example() {
//! let mut pacing = PacingController::new(Duration::from_millis(900));
//!
//! // First request proceeds immediately
//! pacing.before_request().await;
//!
//! // Second request waits out the remainder of the gap
//! pacing.before_request().await;
//! # }
//! ```

use std::time::{Duration, SystemTime};

use reqwest::header::{HeaderMap, HeaderName, RETRY_AFTER};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Header carrying the number of requests left in the current window.
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Header carrying the number of seconds until the current window resets.
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Longest wait a server may impose through `Retry-After` or
/// `X-RateLimit-Reset` (1 hour).
const MAX_SERVER_WAIT: Duration = Duration::from_secs(3600);

/// Server-advertised rate-limit state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests left in the current window, when the server reported it.
    pub remaining: Option<u64>,

    /// When the current window resets.
    pub reset_at: Option<Instant>,

    /// Earliest time the next request may go out, from `Retry-After`.
    /// Cleared once it has been waited out.
    pub retry_after_at: Option<Instant>,
}

/// Per-session pacing controller.
///
/// The session holds this behind a `tokio::sync::Mutex` and keeps the lock
/// across [`before_request`](Self::before_request) and the dispatch that
/// follows, so two concurrent callers can never both observe a stale gap.
#[derive(Debug)]
pub struct PacingController {
    /// Minimum time between the start of two consecutive requests.
    min_gap: Duration,

    /// Start of the previous request. `None` until the first request.
    last_request: Option<Instant>,

    /// Server-advertised limits.
    limits: RateLimitState,
}

impl PacingController {
    /// Creates a controller enforcing `min_gap` between requests.
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_request: None,
            limits: RateLimitState::default(),
        }
    }

    /// Returns the configured minimum gap.
    #[must_use]
    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Changes the minimum gap for subsequent requests.
    pub fn set_min_gap(&mut self, min_gap: Duration) {
        self.min_gap = min_gap;
    }

    /// Returns the current rate-limit state.
    #[must_use]
    pub fn limits(&self) -> &RateLimitState {
        &self.limits
    }

    /// Returns when the previous request started, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    /// Waits until the next request is allowed, then stamps the request time.
    ///
    /// Waits happen in order: the pacing gap, an exhausted quota, then a
    /// pending `Retry-After`. The pending `Retry-After` is cleared once honored.
    /// The first request of a session never waits for the gap.
    ///
    /// Returns the total time spent waiting.
    #[instrument(skip(self), fields(min_gap_ms = self.min_gap.as_millis()))]
    pub async fn before_request(&mut self) -> Duration {
        let mut waited = Duration::ZERO;

        if let Some(last_request) = self.last_request {
            let elapsed = last_request.elapsed();
            if elapsed < self.min_gap {
                let delay = self.min_gap - elapsed;
                debug!(delay_ms = delay.as_millis(), "applying request gap");
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }

        if self.limits.remaining == Some(0)
            && let Some(reset_at) = self.limits.reset_at
        {
            let delay = reset_at.saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                info!(
                    delay_secs = format!("{:.2}", delay.as_secs_f64()),
                    "rate limit hit, sleeping until window resets"
                );
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }

        if let Some(retry_after_at) = self.limits.retry_after_at.take() {
            let delay = retry_after_at.saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                info!(
                    delay_secs = format!("{:.2}", delay.as_secs_f64()),
                    "honoring Retry-After"
                );
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }

        self.last_request = Some(Instant::now());
        waited
    }

    /// Updates rate-limit state from response headers.
    ///
    /// The quota is only updated when both `X-RateLimit-Remaining` and
    /// `X-RateLimit-Reset` are present and numeric. Missing or malformed
    /// headers leave the state untouched.
    #[instrument(skip_all)]
    pub fn observe_response(&mut self, headers: &HeaderMap) {
        let now = Instant::now();

        let remaining = header_i64(headers, &RATE_LIMIT_REMAINING);
        let reset = header_i64(headers, &RATE_LIMIT_RESET);
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            #[allow(clippy::cast_sign_loss)]
            let remaining = remaining.max(0) as u64;
            #[allow(clippy::cast_sign_loss)]
            let reset_in = cap_server_wait(Duration::from_secs(reset.max(0) as u64), "reset");
            self.limits.remaining = Some(remaining);
            self.limits.reset_at = Some(now + reset_in);
            debug!(remaining, reset_secs = reset_in.as_secs(), "rate limit window updated");
        }

        if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
            match parse_retry_after(value) {
                Some(delay) => {
                    info!(delay_secs = delay.as_secs(), "Retry-After header detected");
                    self.limits.retry_after_at = Some(now + delay);
                }
                None => warn!(value, "ignoring unparseable Retry-After header"),
            }
        }
    }
}

fn header_i64(headers: &HeaderMap, name: &HeaderName) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use paced_session::pacing::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();

    let delay = match value.parse::<i64>() {
        Ok(seconds) => {
            let Ok(seconds) = u64::try_from(seconds) else {
                debug!(seconds, "negative Retry-After value, ignoring");
                return None;
            };
            Duration::from_secs(seconds)
        }
        Err(_) => {
            let Ok(at) = httpdate::parse_http_date(value) else {
                debug!(value, "unparseable Retry-After value");
                return None;
            };
            // A date in the past means the wait is already over.
            at.duration_since(SystemTime::now()).unwrap_or_default()
        }
    };

    Some(cap_server_wait(delay, "retry-after"))
}

fn cap_server_wait(delay: Duration, source: &'static str) -> Duration {
    if delay <= MAX_SERVER_WAIT {
        return delay;
    }
    warn!(
        source,
        delay_secs = delay.as_secs(),
        max_secs = MAX_SERVER_WAIT.as_secs(),
        "server-requested wait exceeds maximum, capping at 1 hour"
    );
    MAX_SERVER_WAIT
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    // ==================== before_request Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_first_request_no_delay() {
        let mut pacing = PacingController::new(Duration::from_secs(1));
        let start = Instant::now();

        let waited = pacing.before_request().await;

        assert_eq!(waited, Duration::ZERO);
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(pacing.last_request().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_respect_gap() {
        let mut pacing = PacingController::new(Duration::from_secs(1));
        let start = Instant::now();

        pacing.before_request().await;
        pacing.before_request().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));

        pacing.before_request().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_already_elapsed_no_delay() {
        let mut pacing = PacingController::new(Duration::from_millis(500));
        pacing.before_request().await;

        tokio::time::sleep(Duration::from_secs(2)).await;

        let waited = pacing.before_request().await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_gap_never_waits() {
        let mut pacing = PacingController::new(Duration::ZERO);
        let start = Instant::now();

        for _ in 0..5 {
            pacing.before_request().await;
        }

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_waits_for_reset() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.before_request().await;
        pacing.observe_response(&headers(&[
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", "5"),
        ]));

        let start = Instant::now();
        let waited = pacing.before_request().await;

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(waited >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_quota_does_not_wait() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[
            ("X-RateLimit-Remaining", "12"),
            ("X-RateLimit-Reset", "60"),
        ]));

        let start = Instant::now();
        pacing.before_request().await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(pacing.limits().remaining, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_honored_once() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[("Retry-After", "3")]));
        assert!(pacing.limits().retry_after_at.is_some());

        let start = Instant::now();
        pacing.before_request().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(pacing.limits().retry_after_at.is_none());

        let second = Instant::now();
        pacing.before_request().await;
        assert!(second.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_retry_after_supersedes() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[("Retry-After", "30")]));
        pacing.observe_response(&headers(&[("Retry-After", "2")]));

        let start = Instant::now();
        pacing.before_request().await;

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_accumulate_gap_then_retry_after() {
        let mut pacing = PacingController::new(Duration::from_secs(1));
        pacing.before_request().await;
        pacing.observe_response(&headers(&[("Retry-After", "4")]));

        let start = Instant::now();
        pacing.before_request().await;

        // Gap is covered by the longer Retry-After wait that follows it.
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    // ==================== observe_response Tests ====================

    #[test]
    fn test_observe_without_headers_leaves_state() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&HeaderMap::new());
        assert_eq!(pacing.limits(), &RateLimitState::default());
    }

    #[test]
    fn test_observe_requires_both_rate_limit_headers() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[("X-RateLimit-Remaining", "0")]));
        assert!(pacing.limits().remaining.is_none());

        pacing.observe_response(&headers(&[("X-RateLimit-Reset", "10")]));
        assert!(pacing.limits().reset_at.is_none());
    }

    #[test]
    fn test_observe_negative_remaining_clamps_to_zero() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[
            ("X-RateLimit-Remaining", "-3"),
            ("X-RateLimit-Reset", "1"),
        ]));
        assert_eq!(pacing.limits().remaining, Some(0));
    }

    #[test]
    fn test_observe_malformed_retry_after_ignored() {
        let mut pacing = PacingController::new(Duration::ZERO);
        pacing.observe_response(&headers(&[("Retry-After", "soon")]));
        assert!(pacing.limits().retry_after_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_reset_is_capped_at_one_hour() {
        let mut pacing = PacingController::new(Duration::ZERO);
        let observed = Instant::now();
        pacing.observe_response(&headers(&[
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", "9223372036854775807"),
        ]));

        let reset_at = pacing.limits().reset_at.unwrap();
        assert_eq!(reset_at.duration_since(observed), Duration::from_secs(3600));

        let waited = pacing.before_request().await;
        assert_eq!(waited, Duration::from_secs(3600));
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_huge_value_is_capped() {
        assert_eq!(
            parse_retry_after("9223372036854775807"),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }
}
