//! Streaming file downloads through a session.
//!
//! Downloads go through the same paced, retrying path as every other
//! request. The target is either a file path or an existing directory, in
//! which case the filename is inferred from the server's
//! `Content-Disposition` header or the URL.
//!
//! # Example
//!
//! ```no_run
//! use paced_session::{DownloadOptions, Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(SessionConfig::default())?;
//! let options = DownloadOptions::default().confirm_downloadable(true);
//! if let Some(path) = session.download("https://example.com/report.pdf", "./downloads", &options).await? {
//!     println!("Downloaded: {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod constants;
mod error;
mod filename;

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Response;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use constants::DOWNLOAD_TIMEOUT;
pub use error::DownloadError;

use crate::error::RequestError;
use crate::session::{RequestOptions, Session};
use filename::{
    DEFAULT_FILENAME, filename_from_url_path, is_downloadable_content_type,
    parse_content_disposition, sanitize_filename,
};

/// Options for [`Session::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Check the Content-Type with a HEAD request first and skip pages.
    pub confirm_downloadable: bool,
    /// Timeout for the download request.
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            confirm_downloadable: false,
            timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl DownloadOptions {
    /// Sets whether downloadability is confirmed first.
    #[must_use]
    pub fn confirm_downloadable(mut self, confirm: bool) -> Self {
        self.confirm_downloadable = confirm;
        self
    }

    /// Sets the download timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Session {
    /// Returns true unless a HEAD request reports a page-like Content-Type.
    ///
    /// A response without a Content-Type is treated as downloadable.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the HEAD request fails.
    #[instrument(skip(self))]
    pub async fn downloadable(&self, url: &str) -> Result<bool, RequestError> {
        let response = self.head(url).await?;
        let verdict = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(is_downloadable_content_type);
        debug!(downloadable = verdict, "content type checked");
        Ok(verdict)
    }

    /// Infers a filesystem-safe filename for `url`.
    ///
    /// Uses the `Content-Disposition` filename from a HEAD request when
    /// present, otherwise the last URL path segment.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the URL is invalid or the HEAD request fails.
    #[instrument(skip(self))]
    pub async fn filename_from_url(&self, url: &str) -> Result<String, RequestError> {
        let response = self.head(url).await?;
        Ok(infer_filename(&response, url))
    }

    /// Downloads `url` to `target`, streaming the body to disk.
    ///
    /// Returns `Ok(None)` when `confirm_downloadable` is set and the URL
    /// serves a page. A partially written file is removed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Request`] when a request fails,
    /// [`DownloadError::Network`] when the body stream breaks, and
    /// [`DownloadError::Io`] when the file cannot be written.
    #[instrument(skip(self, target, options), fields(target = %target.as_ref().display()))]
    pub async fn download(
        &self,
        url: &str,
        target: impl AsRef<Path>,
        options: &DownloadOptions,
    ) -> Result<Option<PathBuf>, DownloadError> {
        if options.confirm_downloadable && !self.downloadable(url).await? {
            info!("skipping page-like content");
            return Ok(None);
        }

        let target = target.as_ref();
        let file_path = if is_directory(target).await {
            target.join(self.filename_from_url(url).await?)
        } else {
            target.to_path_buf()
        };
        debug!(path = %file_path.display(), "resolved output path");

        let request = RequestOptions::new().timeout(options.timeout);
        let response = self.get_with(url, &request).await?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "writing body of non-success response");
        }

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| DownloadError::io(file_path.clone(), e))?;
        let stream_result = stream_to_file(&mut file, response, url, &file_path).await;
        if stream_result.is_err() {
            debug!(path = %file_path.display(), "cleaning up partial file after error");
            drop(file);
            let _ = tokio::fs::remove_file(&file_path).await;
        }
        let bytes = stream_result?;

        info!(path = %file_path.display(), bytes, "download complete");
        Ok(Some(file_path))
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_dir())
}

fn infer_filename(response: &Response, url: &str) -> String {
    if let Some(name) = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
    {
        return sanitize_filename(&name);
    }
    Url::parse(url)
        .ok()
        .as_ref()
        .and_then(filename_from_url_path)
        .map_or_else(|| DEFAULT_FILENAME.to_string(), |name| sanitize_filename(&name))
}

async fn stream_to_file(
    file: &mut File,
    response: Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}
