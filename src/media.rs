//! Video and audio downloads through an external extractor.
//!
//! The default backend drives the `yt-dlp` executable. Media traffic goes
//! straight from the extractor to the remote site and is not paced by the
//! session.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::session::Session;

/// Metadata reported by the extractor, as a JSON object.
pub type MediaInfo = Map<String, Value>;

/// Errors raised by a media backend.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The extractor executable could not be found.
    #[error("media tool not found: {program}")]
    ToolMissing {
        /// Program that was looked up.
        program: PathBuf,
    },

    /// The extractor could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that was started.
        program: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The extractor exited unsuccessfully.
    #[error("media tool exited with {}: {stderr}", describe_exit(.status))]
    Failed {
        /// Exit code, if the process was not killed by a signal.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The extractor's metadata was not a JSON object.
    #[error("invalid media metadata: {0}")]
    Metadata(String),
}

#[allow(clippy::ref_option)]
fn describe_exit(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| format!("status {code}"))
}

/// Where and how to store downloaded media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaOptions {
    /// Output folder; files are named after the media title.
    pub folder: PathBuf,
    /// Extract the audio track as m4a instead of keeping the video.
    pub audio_only: bool,
}

impl MediaOptions {
    /// Creates options writing into `folder`.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            audio_only: false,
        }
    }

    /// Sets audio-only extraction.
    #[must_use]
    pub fn audio_only(mut self, audio_only: bool) -> Self {
        self.audio_only = audio_only;
        self
    }
}

/// An extractor capable of reading metadata and downloading media.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Reads metadata for `url` without downloading.
    async fn probe(&self, url: &str) -> Result<MediaInfo, MediaError>;

    /// Downloads `url` according to `options`.
    async fn download(&self, url: &str, options: &MediaOptions) -> Result<(), MediaError>;
}

/// [`MediaBackend`] running the `yt-dlp` executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlp {
    program: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    /// Uses `program` as the executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The executable this backend runs.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn run(&self, args: Vec<OsString>) -> Result<Output, MediaError> {
        debug!(program = %self.program.display(), ?args, "running media tool");
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    MediaError::ToolMissing {
                        program: self.program.clone(),
                    }
                } else {
                    MediaError::Spawn {
                        program: self.program.clone(),
                        source,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(MediaError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaBackend for YtDlp {
    async fn probe(&self, url: &str) -> Result<MediaInfo, MediaError> {
        let output = self.run(probe_args(url)).await?;
        parse_metadata(&output.stdout)
    }

    async fn download(&self, url: &str, options: &MediaOptions) -> Result<(), MediaError> {
        self.run(download_args(url, options)).await.map(|_| ())
    }
}

/// Arguments for a metadata-only run.
pub(crate) fn probe_args(url: &str) -> Vec<OsString> {
    vec![
        "--dump-single-json".into(),
        "--skip-download".into(),
        "--no-warnings".into(),
        "--".into(),
        url.into(),
    ]
}

/// Arguments for a download run.
pub(crate) fn download_args(url: &str, options: &MediaOptions) -> Vec<OsString> {
    let template = options.folder.join("%(title)s.%(ext)s");
    let mut args: Vec<OsString> = vec!["--no-progress".into(), "-o".into(), template.into()];
    if options.audio_only {
        args.extend(
            ["-f", "m4a/bestaudio/best", "-x", "--audio-format", "m4a"]
                .into_iter()
                .map(OsString::from),
        );
    }
    args.push("--".into());
    args.push(url.into());
    args
}

fn parse_metadata(stdout: &[u8]) -> Result<MediaInfo, MediaError> {
    match serde_json::from_slice::<Value>(stdout) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MediaError::Metadata(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(MediaError::Metadata(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Session {
    /// Probes and downloads video (or audio) from `url` into `folder`.
    ///
    /// Returns the extractor's metadata for the media.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError`] if the extractor is missing or fails.
    #[instrument(skip(self, folder), fields(folder = %folder.as_ref().display()))]
    pub async fn video(
        &self,
        url: &str,
        folder: impl AsRef<Path>,
        audio_only: bool,
    ) -> Result<MediaInfo, MediaError> {
        let info = self.media.probe(url).await?;
        let title = info.get("title").and_then(Value::as_str).unwrap_or("untitled");
        debug!(title, "media probed");

        let options = MediaOptions::new(folder.as_ref()).audio_only(audio_only);
        self.media.download(url, &options).await?;
        info!(audio_only, "media downloaded");
        Ok(info)
    }
}
