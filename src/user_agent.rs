//! Browser User-Agent selection and the default browser header template.
//!
//! Sessions start with a fixed Firefox User-Agent so construction never
//! touches the network. [`latest_user_agent`] fetches the daily-published
//! list of current browser UAs when a fresher string is wanted.

use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderName, HeaderValue, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use tracing::{debug, instrument, warn};

/// Published list of current browser User-Agent strings.
pub const USER_AGENTS_URL: &str = "https://jnrbsn.github.io/user-agents/user-agents.json";

/// User-Agent used when the published list is unavailable.
pub const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/117.0";

const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,\
    image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";

/// Returns the browser-like header template installed on new sessions.
///
/// `Accept-Encoding` is left to the HTTP client so that compressed bodies are
/// decoded transparently.
#[must_use]
pub fn default_browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(user_agent)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_USER_AGENT));
    headers.insert(USER_AGENT, user_agent);
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-CA,en-US;q=0.7,en;q=0.3"),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("none"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );
    headers
}

/// Returns the newest published User-Agent for `browser`.
///
/// Falls back to [`FALLBACK_USER_AGENT`] when the list cannot be fetched or
/// contains no match.
#[instrument(skip(client))]
pub async fn latest_user_agent(client: &Client, browser: &str) -> String {
    fetch_user_agent(client, USER_AGENTS_URL, browser).await
}

/// Same as [`latest_user_agent`], reading the list from `source_url`.
#[instrument(skip(client))]
pub async fn fetch_user_agent(client: &Client, source_url: &str, browser: &str) -> String {
    match fetch_list(client, source_url).await {
        Ok(agents) => {
            if let Some(agent) = pick_user_agent(&agents, browser) {
                debug!(user_agent = %agent, "selected published user agent");
                return agent.to_string();
            }
            warn!(browser, "no published user agent matches browser, using fallback");
        }
        Err(error) => {
            warn!(error = %error, "failed to fetch user agent list, using fallback");
        }
    }
    FALLBACK_USER_AGENT.to_string()
}

async fn fetch_list(client: &Client, source_url: &str) -> Result<Vec<String>, String> {
    let response = client
        .get(source_url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;
    let body = response.text().await.map_err(|e| e.to_string())?;
    serde_json::from_str(&body).map_err(|e| e.to_string())
}

/// Returns the first agent containing `browser`, compared case-insensitively.
fn pick_user_agent<'a>(agents: &'a [String], browser: &str) -> Option<&'a str> {
    let needle = browser.to_lowercase();
    agents
        .iter()
        .map(String::as_str)
        .find(|agent| agent.to_lowercase().contains(&needle))
}
