//! Binary snapshots of session state.
//!
//! A snapshot carries the config, default headers, cookies, credentials and
//! mounted adapters. Pacing and rate-limit state are runtime-only: a restored
//! session starts with no gap to wait out.
//!
//! Layout: a postcard-encoded `u16` format version followed by the body.

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{BasicCredentials, Session, SessionConfig};
use crate::cookies::{Cookie, SessionCookies};
use crate::error::SessionError;
use crate::transport::MountTable;

/// Version written at the head of every snapshot.
pub const SESSION_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoredHeader {
    name: String,
    value: Vec<u8>,
    sensitive: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    config: SessionConfig,
    headers: Vec<StoredHeader>,
    cookies: Vec<Cookie>,
    basic_auth: Option<BasicCredentials>,
    mounts: MountTable,
}

impl Session {
    /// Encodes the session state into a versioned snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        let snapshot = Snapshot {
            config: self.config.clone(),
            headers: encode_headers(&self.headers()),
            cookies: self.cookies.snapshot(),
            basic_auth: self.basic_auth(),
            mounts: self.mounts.clone(),
        };
        postcard::to_allocvec(&(SESSION_FORMAT_VERSION, &snapshot)).map_err(SessionError::Encode)
    }

    /// Rebuilds a session from a snapshot produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnsupportedFormat`] for a snapshot of another
    /// version, [`SessionError::Decode`] for malformed bytes, and
    /// [`SessionError::InvalidHeader`] if a stored header no longer encodes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        let (version, rest) = postcard::take_from_bytes::<u16>(bytes).map_err(SessionError::Decode)?;
        if version != SESSION_FORMAT_VERSION {
            return Err(SessionError::UnsupportedFormat {
                found: version,
                expected: SESSION_FORMAT_VERSION,
            });
        }
        let snapshot: Snapshot = postcard::from_bytes(rest).map_err(SessionError::Decode)?;

        let headers = decode_headers(snapshot.headers)?;
        let cookies = Arc::new(SessionCookies::new());
        cookies.merge(snapshot.cookies);

        Self::assemble(
            snapshot.config,
            headers,
            cookies,
            snapshot.basic_auth,
            snapshot.mounts,
        )
    }

    /// Writes the session snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file cannot be written.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub async fn save_session(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::io(parent, e))?;
        }
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| SessionError::io(path, e))?;
        info!(bytes = bytes.len(), "session saved");
        Ok(())
    }

    /// Restores a session from a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the file cannot be read, plus every
    /// error [`from_bytes`](Self::from_bytes) can return.
    #[instrument(fields(path = %path.as_ref().display()))]
    pub async fn load_session(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SessionError::io(path, e))?;
        let session = Self::from_bytes(&bytes)?;
        info!(cookies = session.cookies.len(), "session loaded");
        Ok(session)
    }
}

fn encode_headers(headers: &HeaderMap) -> Vec<StoredHeader> {
    headers
        .iter()
        .map(|(name, value)| StoredHeader {
            name: name.as_str().to_string(),
            value: value.as_bytes().to_vec(),
            sensitive: value.is_sensitive(),
        })
        .collect()
}

fn decode_headers(stored: Vec<StoredHeader>) -> Result<HeaderMap, SessionError> {
    let mut headers = HeaderMap::with_capacity(stored.len());
    for header in stored {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            SessionError::InvalidHeader {
                name: header.name.clone(),
            }
        })?;
        let mut value = HeaderValue::from_bytes(&header.value)
            .map_err(|_| SessionError::InvalidHeader { name: header.name })?;
        value.set_sensitive(header.sensitive);
        headers.append(name, value);
    }
    debug!(count = headers.len(), "headers restored");
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use reqwest::header::AUTHORIZATION;
    use tempfile::TempDir;

    use super::*;
    use crate::transport::RetryTransport;

    fn configured_session() -> Session {
        let config = SessionConfig::default()
            .with_min_request_gap(Duration::from_millis(250))
            .with_retries(2);
        let mut session = Session::new(config).unwrap();
        session.update_header([("X-Client", "paced")]).unwrap();
        session.update_cookies([("id", "abc"), ("theme", "dark")]);
        session.setup_auth_oauth2("secret-token").unwrap();
        session.mount(
            "https://api.example.com/",
            RetryTransport::new(
                crate::transport::RetryPolicy::default().with_total(0),
                Duration::from_secs(1),
            ),
        );
        session
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let session = configured_session();
        let restored = Session::from_bytes(&session.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.config(), session.config());
        assert_eq!(restored.headers(), session.headers());
        assert_eq!(restored.cookies().snapshot(), session.cookies().snapshot());
        assert_eq!(restored.mounts(), session.mounts());
    }

    #[test]
    fn test_round_trip_keeps_authorization_sensitive() {
        let session = configured_session();
        let restored = Session::from_bytes(&session.to_bytes().unwrap()).unwrap();
        assert!(restored.headers().get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn test_round_trip_keeps_basic_credentials() {
        let session = Session::new(SessionConfig::default()).unwrap();
        session.setup_auth_basic("user", "pass");
        let restored = Session::from_bytes(&session.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.basic_auth(), session.basic_auth());
    }

    #[test]
    fn test_from_bytes_rejects_other_version() {
        let bytes = postcard::to_allocvec(&(SESSION_FORMAT_VERSION + 1, 0u8)).unwrap();
        let result = Session::from_bytes(&bytes);
        assert!(matches!(
            result,
            Err(SessionError::UnsupportedFormat { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let mut bytes = postcard::to_allocvec(&SESSION_FORMAT_VERSION).unwrap();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(
            Session::from_bytes(&bytes),
            Err(SessionError::Decode(_))
        ));
        assert!(matches!(Session::from_bytes(&[]), Err(SessionError::Decode(_))));
    }

    #[tokio::test]
    async fn test_save_and_load_session_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.bin");

        let session = configured_session();
        session.save_session(&path).await.unwrap();
        let restored = Session::load_session(&path).await.unwrap();

        assert_eq!(restored.cookies().get("id").as_deref(), Some("abc"));
        assert_eq!(restored.headers().get("x-client").unwrap(), "paced");
    }

    #[tokio::test]
    async fn test_load_session_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Session::load_session(dir.path().join("absent.bin")).await;
        assert!(matches!(result, Err(SessionError::Io { .. })));
    }
}
