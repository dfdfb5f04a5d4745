//! File configuration for `paced` defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::logging::LogLevel;

/// Values read from `config.toml`. Unset keys fall back to library defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileConfig {
    /// Minimum gap between requests in milliseconds.
    pub min_request_gap_ms: Option<u64>,
    /// Retries beyond the first attempt.
    pub retries: Option<u32>,
    /// Exponential backoff factor in seconds.
    pub backoff_factor: Option<f64>,
    /// Default request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Abort bulk operations on the first failure.
    pub raise_errors: Option<bool>,
    /// Default log level.
    pub log_level: Option<LogLevel>,
    /// Directory for the monthly log file.
    pub log_dir: Option<PathBuf>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(gap) = self.min_request_gap_ms
            && gap > 60_000
        {
            bail!("Invalid config value for `min_request_gap_ms`: {gap}. Expected range: 0..=60000");
        }
        if let Some(retries) = self.retries
            && retries > 20
        {
            bail!("Invalid config value for `retries`: {retries}. Expected range: 0..=20");
        }
        if let Some(factor) = self.backoff_factor
            && !(0.0..=60.0).contains(&factor)
        {
            bail!("Invalid config value for `backoff_factor`: {factor}. Expected range: 0..=60");
        }
        if let Some(timeout) = self.timeout_secs
            && !(1..=3600).contains(&timeout)
        {
            bail!("Invalid config value for `timeout_secs`: {timeout}. Expected range: 1..=3600");
        }
        Ok(())
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/paced/config.toml`
/// 2. `$HOME/.config/paced/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("paced").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("paced")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return read_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "min_request_gap_ms" => {
                cfg.min_request_gap_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "retries" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("retries out of range for u32"))?;
                cfg.retries = Some(n);
            }
            "backoff_factor" => {
                cfg.backoff_factor = Some(parse_float(value).with_context(context)?);
            }
            "timeout_secs" => {
                cfg.timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "raise_errors" => {
                cfg.raise_errors = Some(parse_boolean(value).with_context(context)?);
            }
            "log_level" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.log_level = Some(LogLevel::parse(&parsed).with_context(context)?);
            }
            "log_dir" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.log_dir = Some(PathBuf::from(parsed));
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_float(raw_value: &str) -> Result<f64> {
    let value = raw_value.trim().parse::<f64>()?;
    if !value.is_finite() {
        bail!("Expected a finite number");
    }
    Ok(value)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
