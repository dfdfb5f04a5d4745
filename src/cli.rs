//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Polite, paced HTTP fetching from the command line.
///
/// Every request waits out a minimum gap, honors server rate limits and
/// retries transient failures with exponential backoff.
#[derive(Parser, Debug)]
#[command(name = "paced")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a config file (default: $XDG_CONFIG_HOME/paced/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that shape the session.
#[derive(ClapArgs, Debug, Default)]
pub struct SessionArgs {
    /// Minimum delay between requests in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000), global = true)]
    pub min_gap_ms: Option<u64>,

    /// Retry attempts beyond the first for transient failures (0-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=20), global = true)]
    pub retries: Option<u32>,

    /// Default request timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600), global = true)]
    pub timeout_secs: Option<u64>,

    /// Record failures in bulk requests instead of aborting
    #[arg(long, global = true)]
    pub no_raise: bool,

    /// Directory for the monthly log file
    #[arg(long, value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Restore session state from a file before running
    #[arg(long = "session", value_name = "FILE", global = true)]
    pub load: Option<PathBuf>,

    /// Save session state to a file after running
    #[arg(long = "save-session", value_name = "FILE", global = true)]
    pub save: Option<PathBuf>,

    /// Extra default header, as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header_arg, global = true)]
    pub headers: Vec<(String, String)>,

    /// Cookie to send, as NAME=VALUE (repeatable)
    #[arg(long = "cookie", value_name = "NAME=VALUE", value_parser = parse_cookie_arg, global = true)]
    pub cookies: Vec<(String, String)>,

    /// OAuth2 bearer token
    #[arg(long, value_name = "TOKEN", conflicts_with = "basic", global = true)]
    pub bearer: Option<String>,

    /// Fetch the newest published User-Agent for BROWSER (default firefox)
    #[arg(
        long,
        value_name = "BROWSER",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "firefox",
        global = true
    )]
    pub fresh_user_agent: Option<String>,

        /// HTTP basic credentials, as USER:PASSWORD
    #[arg(long, value_name = "USER:PASSWORD", value_parser = parse_basic_arg, global = true)]
    pub basic: Option<(String, String)>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch one or more URLs. One URL prints the body; several print status lines.
    Get {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Fetch a page and print the text of elements matching a CSS selector
    Soup {
        /// Page URL
        url: String,

        /// CSS selector
        #[arg(short, long)]
        select: String,
    },

    /// Download a file
    Download {
        /// File URL
        url: String,

        /// Target file, or an existing directory to infer the name in
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Skip URLs that serve pages rather than files
        #[arg(long)]
        confirm: bool,
    },

    /// Download video or audio with yt-dlp
    Video {
        /// Media page URL
        url: String,

        /// Output folder
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Keep only the audio track (m4a)
        #[arg(long)]
        audio_only: bool,
    },
}

fn parse_header_arg(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_cookie_arg(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("cookie name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_basic_arg(raw: &str) -> Result<(String, String), String> {
    let (user, password) = raw
        .split_once(':')
        .ok_or_else(|| "expected USER:PASSWORD".to_string())?;
    Ok((user.to_string(), password.to_string()))
}
