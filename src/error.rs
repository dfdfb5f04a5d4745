//! Error types for session requests and session persistence.
//!
//! Errors carry the URL or path they relate to, so callers can report
//! failures without threading extra context around.

use std::path::PathBuf;

use reqwest::header::HeaderMap;
use thiserror::Error;

/// Errors that can occur while issuing a request through a [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum RequestError {
    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A header name or value could not be encoded for the wire.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// A CSS selector could not be parsed.
    #[error("invalid CSS selector {selector:?}: {reason}")]
    InvalidSelector {
        /// The selector as given.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// Transport-level failure that is not eligible for retry.
    #[error("transport error requesting {url}: {source}")]
    Transport {
        /// The URL that failed.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// Every allowed attempt failed with a retryable status or connection error.
    #[error("retries exhausted after {attempts} attempts requesting {url}{}", describe_status(.status))]
    RetryExhausted {
        /// The URL that failed.
        url: String,
        /// Total attempts made, including the first.
        attempts: u32,
        /// Status of the last response, when the last failure was a status.
        status: Option<u16>,
        /// Error of the last attempt, when the last failure was a connection error.
        #[source]
        source: Option<reqwest::Error>,
        /// Headers of the last response, when the last failure was a status.
        headers: Option<Box<HeaderMap>>,
    },
}

#[allow(clippy::ref_option)]
fn describe_status(status: &Option<u16>) -> String {
    status.map_or_else(String::new, |code| format!(" (last status {code})"))
}

impl RequestError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Creates an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transport error from a reqwest error.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates a retry-exhausted error ending on a retryable status.
    pub fn exhausted_status(
        url: impl Into<String>,
        attempts: u32,
        status: u16,
        headers: HeaderMap,
    ) -> Self {
        Self::RetryExhausted {
            url: url.into(),
            attempts,
            status: Some(status),
            source: None,
            headers: Some(Box::new(headers)),
        }
    }

    /// Creates a retry-exhausted error ending on a connection failure.
    pub fn exhausted_error(url: impl Into<String>, attempts: u32, source: reqwest::Error) -> Self {
        Self::RetryExhausted {
            url: url.into(),
            attempts,
            status: None,
            source: Some(source),
            headers: None,
        }
    }

    /// Returns true when the failure came from exhausting the retry budget.
    #[must_use]
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Returns the headers of the final response when retries ran out on a status.
    #[must_use]
    pub fn last_response_headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::RetryExhausted { headers, .. } => headers.as_deref(),
            _ => None,
        }
    }

    /// Returns the URL the error relates to, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::InvalidUrl { url }
            | Self::Transport { url, .. }
            | Self::RetryExhausted { url, .. } => Some(url),
            Self::InvalidHeader { .. } | Self::InvalidSelector { .. } => None,
        }
    }
}

/// Errors raised while building, saving, or restoring a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// A configured header could not be encoded.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// Reading or writing a session file failed.
    #[error("IO error on session file {path}: {source}")]
    Io {
        /// The session file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The session state could not be encoded.
    #[error("failed to encode session state: {0}")]
    Encode(#[source] postcard::Error),

    /// The bytes are not a valid session snapshot.
    #[error("failed to decode session state: {0}")]
    Decode(#[source] postcard::Error),

    /// The session file was written by an incompatible format version.
    #[error("unsupported session format version {found} (expected {expected})")]
    UnsupportedFormat {
        /// Version found in the file.
        found: u16,
        /// Version this build reads.
        expected: u16,
    },
}

impl SessionError {
    /// Creates an IO error for a session file.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_invalid_url_display() {
        let error = RequestError::invalid_url("not-a-url");
        let msg = error.to_string();
        assert!(msg.contains("invalid URL"), "Expected 'invalid URL' in: {msg}");
        assert!(msg.contains("not-a-url"), "Expected URL in: {msg}");
        assert_eq!(error.url(), Some("not-a-url"));
    }

    #[test]
    fn test_request_error_exhausted_status_display() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", reqwest::header::HeaderValue::from_static("30"));
        let error = RequestError::exhausted_status("https://example.com/api", 3, 503, headers);
        let msg = error.to_string();
        assert!(msg.contains("3 attempts"), "Expected attempt count in: {msg}");
        assert!(msg.contains("503"), "Expected status in: {msg}");
        assert!(error.is_retry_exhausted());
        let last = error.last_response_headers().unwrap();
        assert_eq!(last.get("retry-after").unwrap(), "30");
    }

    #[test]
    fn test_request_error_invalid_header_has_no_url() {
        let error = RequestError::invalid_header("X-Bad\n");
        assert!(error.url().is_none());
        assert!(!error.is_retry_exhausted());
    }

    #[test]
    fn test_session_error_unsupported_format_display() {
        let error = SessionError::UnsupportedFormat {
            found: 9,
            expected: 1,
        };
        let msg = error.to_string();
        assert!(msg.contains('9'), "Expected found version in: {msg}");
        assert!(msg.contains('1'), "Expected expected version in: {msg}");
    }

    #[test]
    fn test_session_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = SessionError::io("/tmp/session.bin", io_error);
        assert!(error.to_string().contains("/tmp/session.bin"));
    }
}
