//! The retrying dispatch loop and the per-prefix mount table.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::retry::{RetryDecision, RetryPolicy};
use crate::error::RequestError;
use crate::pacing::parse_retry_after;

/// Transport adapter that adds a default timeout and bounded retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryTransport {
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl RetryTransport {
    /// Creates an adapter with the given policy and default timeout.
    #[must_use]
    pub fn new(policy: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            policy,
            default_timeout,
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the timeout applied when a request has none.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Dispatches `request`, retrying retryable failures.
    ///
    /// Responses whose status is in the policy's forcelist, connection
    /// failures, and timeouts are retried until the policy's budget runs out.
    /// Any other response, including non-retryable error statuses, is returned
    /// as-is. Requests with a non-cloneable body are sent exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::RetryExhausted`] when every attempt failed with a
    /// retryable status or connection error, and [`RequestError::Transport`]
    /// for failures that are not eligible for retry.
    #[instrument(skip_all, fields(url = %request.url(), method = %request.method()))]
    pub async fn send(&self, client: &Client, mut request: Request) -> Result<Response, RequestError> {
        if request.timeout().is_none() {
            *request.timeout_mut() = Some(self.default_timeout);
        }
        let url = request.url().to_string();

        let mut attempt: u32 = 1;
        loop {
            let Some(current) = request.try_clone() else {
                debug!("request body is not cloneable, sending once");
                return client
                    .execute(request)
                    .await
                    .map_err(|e| RequestError::transport(url, e));
            };

            debug!(attempt, "dispatching");
            let failure = match client.execute(current).await {
                Ok(response) if self.policy.is_retry_status(response.status()) => {
                    Failure::Status(response)
                }
                Ok(response) => return Ok(response),
                Err(error) if is_retryable_error(&error) => Failure::Connection(error),
                Err(error) => return Err(RequestError::transport(url, error)),
            };

            let retry_after = match &failure {
                Failure::Status(response) => response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after),
                Failure::Connection(_) => None,
            };

            match self.policy.should_retry(attempt, retry_after) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        failure = %failure,
                        delay_ms = delay.as_millis(),
                        "retryable failure, backing off"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(attempt, failure = %failure, reason, "giving up");
                    return Err(match failure {
                        Failure::Status(response) => RequestError::exhausted_status(
                            url,
                            attempt,
                            response.status().as_u16(),
                            response.headers().clone(),
                        ),
                        Failure::Connection(error) => {
                            RequestError::exhausted_error(url, attempt, error)
                        }
                    });
                }
            }
        }
    }
}

/// Outcome of an attempt that may be retried.
enum Failure {
    Status(Response),
    Connection(reqwest::Error),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(response) => write!(f, "HTTP {}", response.status().as_u16()),
            Self::Connection(error) => write!(f, "{error}"),
        }
    }
}

/// Connection resets, refused connections, and timeouts may succeed on retry.
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Adapters keyed by URL prefix; the longest matching prefix wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountTable {
    mounts: Vec<(String, RetryTransport)>,
}

impl MountTable {
    /// Creates a table with the same adapter mounted on `http://` and `https://`.
    #[must_use]
    pub fn with_default(transport: &RetryTransport) -> Self {
        let mut table = Self::default();
        table.mount("http://", transport.clone());
        table.mount("https://", transport.clone());
        table
    }

    /// Mounts `transport` for URLs starting with `prefix`, replacing any
    /// adapter already mounted on the same prefix.
    pub fn mount(&mut self, prefix: impl Into<String>, transport: RetryTransport) {
        let prefix = prefix.into().to_lowercase();
        if let Some(slot) = self.mounts.iter_mut().find(|(p, _)| *p == prefix) {
            slot.1 = transport;
        } else {
            self.mounts.push((prefix, transport));
        }
    }

    /// Returns the adapter with the longest prefix matching `url`.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<&RetryTransport> {
        let lowered = url.to_lowercase();
        self.mounts
            .iter()
            .filter(|(prefix, _)| lowered.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, transport)| transport)
    }

    /// Iterates over mounted prefixes and adapters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RetryTransport)> {
        self.mounts.iter().map(|(p, t)| (p.as_str(), t))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn transport(total: u32) -> RetryTransport {
        RetryTransport::new(
            RetryPolicy::default().with_total(total),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_mount_table_default_covers_both_schemes() {
        let table = MountTable::with_default(&transport(5));
        assert!(table.resolve("http://example.com/").is_some());
        assert!(table.resolve("https://example.com/").is_some());
        assert!(table.resolve("ftp://example.com/").is_none());
    }

    #[test]
    fn test_mount_table_longest_prefix_wins() {
        let mut table = MountTable::with_default(&transport(5));
        table.mount("https://api.example.com/", transport(1));

        let api = table.resolve("https://api.example.com/v1/items").unwrap();
        assert_eq!(api.policy().total(), 1);

        let other = table.resolve("https://www.example.com/").unwrap();
        assert_eq!(other.policy().total(), 5);
    }

    #[test]
    fn test_mount_table_prefix_is_case_insensitive() {
        let mut table = MountTable::default();
        table.mount("HTTPS://", transport(2));
        assert_eq!(
            table.resolve("https://example.com").unwrap().policy().total(),
            2
        );
    }

    #[test]
    fn test_mount_table_remount_replaces() {
        let mut table = MountTable::with_default(&transport(5));
        table.mount("https://", transport(0));
        assert_eq!(table.iter().count(), 2);
        assert_eq!(
            table.resolve("https://example.com").unwrap().policy().total(),
            0
        );
    }
}
