//! CLI entry point for the `paced` tool.

use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paced_session::{DownloadOptions, ErrorPolicy, RequestOptions, Session, SessionConfig};
use tracing::{debug, info};

mod app_config;
mod cli;
mod logging;

use app_config::{FileConfig, load_file_config};
use cli::{Args, Command, SessionArgs};
use logging::{LogLevel, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = load_file_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let level = if args.quiet {
        LogLevel::Error
    } else if args.verbose > 0 {
        LogLevel::Debug
    } else {
        file_config.log_level.unwrap_or_default()
    };
    let log_dir = args.session.log_dir.clone().or_else(|| file_config.log_dir.clone());
    let _log_guard = init_logging(level, log_dir.as_deref())?;

    debug!(?args, "CLI arguments parsed");

    let session = build_session(&args.session, &file_config).await?;
    let use_spinner = !args.quiet && io::stderr().is_terminal();

    match args.command {
        Command::Get { urls } => run_get(&session, &urls).await?,
        Command::Soup { url, select } => run_soup(&session, &url, &select).await?,
        Command::Download {
            url,
            output,
            confirm,
        } => {
            let spinner = spinner(use_spinner, format!("Downloading {url}..."));
            let options = DownloadOptions::default().confirm_downloadable(confirm);
            let result = session.download(&url, &output, &options).await;
            spinner.finish_and_clear();
            match result? {
                Some(path) => println!("{}", path.display()),
                None => println!("skipped: {url} serves a page, not a file"),
            }
        }
        Command::Video {
            url,
            output,
            audio_only,
        } => {
            let spinner = spinner(use_spinner, format!("Fetching media from {url}..."));
            let result = session.video(&url, &output, audio_only).await;
            spinner.finish_and_clear();
            let info = result?;
            let title = info
                .get("title")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("untitled");
            println!("{title}");
        }
    }

    if let Some(path) = &args.session.save {
        session
            .save_session(path)
            .await
            .with_context(|| format!("Failed to save session to '{}'", path.display()))?;
    }

    Ok(())
}

/// Builds the session. Precedence: CLI > config file > defaults.
///
/// A restored session keeps its saved settings; CLI headers, cookies and
/// credentials are applied on top.
async fn build_session(args: &SessionArgs, file: &FileConfig) -> Result<Session> {
    let session = match &args.load {
        Some(path) => load_session(path).await?,
        None => Session::new(session_config(args, file))?,
    };

    if let Some(browser) = &args.fresh_user_agent {
        session.refresh_user_agent(browser).await;
    }
    session.update_header(args.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    session.update_cookies(args.cookies.iter().cloned());
    if let Some(token) = &args.bearer {
        session.setup_auth_oauth2(token)?;
    }
    if let Some((user, password)) = &args.basic {
        session.setup_auth_basic(user, password);
    }
    Ok(session)
}

async fn load_session(path: &Path) -> Result<Session> {
    Session::load_session(path)
        .await
        .with_context(|| format!("Failed to load session from '{}'", path.display()))
}

fn session_config(args: &SessionArgs, file: &FileConfig) -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Some(gap) = args.min_gap_ms.or(file.min_request_gap_ms) {
        config = config.with_min_request_gap(Duration::from_millis(gap));
    }
    if let Some(retries) = args.retries.or(file.retries) {
        config = config.with_retries(retries);
    }
    if let Some(factor) = file.backoff_factor {
        config = config.with_backoff_factor(factor);
    }
    if let Some(timeout) = args.timeout_secs.or(file.timeout_secs) {
        config = config.with_timeout(Duration::from_secs(timeout));
    }
    let raise = !args.no_raise && file.raise_errors.unwrap_or(true);
    config.with_error_policy(if raise {
        ErrorPolicy::Raise
    } else {
        ErrorPolicy::Record
    })
}

async fn run_get(session: &Session, urls: &[String]) -> Result<()> {
    if let [url] = urls {
        let response = session.get(url).await?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&body)?;
        stdout.flush()?;
        return Ok(());
    }

    let results = session.bulk_get(urls, &RequestOptions::default()).await?;
    let mut failed = 0usize;
    for (url, result) in urls.iter().zip(&results) {
        match result {
            Some(response) => println!("{} {url}", response.status().as_u16()),
            None => {
                failed += 1;
                println!("FAILED {url}");
            }
        }
    }
    info!(total = urls.len(), failed, "bulk fetch finished");
    if failed == urls.len() {
        bail!("all {failed} requests failed");
    }
    Ok(())
}

async fn run_soup(session: &Session, url: &str, selector: &str) -> Result<()> {
    let texts = {
        let soup = session.soup(url).await?;
        soup.select(selector)?
    };
    for text in texts {
        println!("{}", text.trim());
    }
    Ok(())
}

fn spinner(enabled: bool, message: String) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    spinner
}
