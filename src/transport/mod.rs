//! Retrying transport adapters mounted on a session by URL prefix.
//!
//! A [`RetryTransport`] dispatches one logical request, applying a default
//! timeout when the caller gave none and retrying retryable statuses and
//! connection failures according to its [`RetryPolicy`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use paced_session::transport::{RetryPolicy, RetryTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//! let transport = RetryTransport::new(RetryPolicy::default(), Duration::from_secs(5));
//! let request = client.get("https://example.com/").build()?;
//! let response = transport.send(&client, request).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

mod adapter;
mod retry;

pub use adapter::{MountTable, RetryTransport};
pub use retry::{RetryDecision, RetryPolicy};

/// Default retries beyond the first attempt.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default backoff factor in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.5;

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Default per-request timeout when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);
