//! Paced HTTP sessions.
//!
//! A [`Session`] wraps an HTTP client with the behavior a polite scraper
//! needs: a minimum gap between requests, honoring of server rate-limit and
//! `Retry-After` headers, bounded retries with exponential backoff, shared
//! headers, cookies and credentials, and binary save/restore of that state.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`session`] - The session facade, its configuration and persistence
//! - [`pacing`] - Request gap and rate-limit tracking
//! - [`transport`] - Retry policy and the per-prefix adapter table
//! - [`cookies`] - The session cookie jar
//! - [`html`] - Parsed HTML responses
//! - [`download`] - Streaming file downloads
//! - [`media`] - Video and audio downloads through `yt-dlp`
//! - [`user_agent`] - Browser header template and User-Agent lookup

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cookies;
pub mod download;
pub mod error;
pub mod html;
pub mod media;
pub mod pacing;
pub mod session;
pub mod transport;
pub mod user_agent;

// Re-export commonly used types
pub use cookies::{Cookie, CookieInput, SessionCookies};
pub use download::{DownloadError, DownloadOptions};
pub use error::{RequestError, SessionError};
pub use html::Soup;
pub use media::{MediaBackend, MediaError, MediaInfo, MediaOptions, YtDlp};
pub use pacing::{PacingController, RateLimitState};
pub use session::{
    BasicCredentials, ErrorPolicy, RequestOptions, SESSION_FORMAT_VERSION, Session, SessionConfig,
};
pub use transport::{MountTable, RetryDecision, RetryPolicy, RetryTransport};
