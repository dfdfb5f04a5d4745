//! Error types for file downloads.

use std::path::PathBuf;

use thiserror::Error;

use crate::error::RequestError;

/// Errors that can occur while downloading a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request itself failed (invalid URL, transport error, retries exhausted).
    #[error(transparent)]
    Request(#[from] RequestError),

    /// The body stream broke off mid-download.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being downloaded.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while creating or writing the target.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
