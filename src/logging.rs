//! Logging initialization for the `paced` binary.
//!
//! Events go to stderr through an `EnvFilter`. When a log directory is
//! configured, a second non-ANSI layer appends to
//! `<dir>/<user>-<YYYY>-<Mon>.log`, so each user gets one file per month.

use std::env;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Timestamp format shared by both outputs.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Supported log levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
    Off,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Error => "error",
            Self::Off => "off",
        }
    }

    /// Parses a level label.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            other => bail!("Unknown log level '{other}'. Expected one of: debug, info, error, off"),
        }
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `level` when set. The returned guard must be held
/// until exit so buffered file output is flushed.
pub fn init_logging(level: LogLevel, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory '{}'", dir.display()))?;
            let appender =
                tracing_appender::rolling::never(dir, log_file_name(&current_user(), Local::now()));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// `<user>-<YYYY>-<Mon>.log`, e.g. `alice-2024-Mar.log`.
fn log_file_name(user: &str, now: DateTime<Local>) -> String {
    format!("{user}-{}.log", now.format("%Y-%b"))
}

fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
