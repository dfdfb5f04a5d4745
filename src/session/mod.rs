//! The session facade: paced, retrying requests with shared headers, cookies
//! and credentials.
//!
//! Every request issued through a [`Session`] follows the same path:
//!
//! ```text
//! IDLE -> PACING (gap / rate limit / Retry-After) -> DISPATCHING (attempt 1..N) -> SUCCEEDED | FAILED
//! ```
//!
//! Both terminal states leave the session ready for the next call.
//!
//! # Example
//!
//! ```no_run
//! use paced_session::{Session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(SessionConfig::default())?;
//! session.update_cookies([("id", "abc")]);
//! let response = session.get("https://example.com/").await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

mod config;
mod persist;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, Method, Request, Response, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

pub use config::{DEFAULT_MIN_REQUEST_GAP, ErrorPolicy, SessionConfig};
pub use persist::SESSION_FORMAT_VERSION;

use crate::cookies::{Cookie, CookieInput, SessionCookies};
use crate::error::{RequestError, SessionError};
use crate::media::{MediaBackend, YtDlp};
use crate::pacing::{PacingController, RateLimitState};
use crate::transport::{MountTable, RetryTransport};
use crate::user_agent::{
    FALLBACK_USER_AGENT, default_browser_headers, fetch_user_agent, latest_user_agent,
};

/// Per-call request parameters.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query pairs appended to the URL.
    pub query: Vec<(String, String)>,
    /// Headers overriding the session defaults for this call.
    pub headers: HeaderMap,
    /// Timeout for this call; the adapter default applies when `None`.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a query pair.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a per-call header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a per-call header from strings.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidHeader`] if the name or value is not valid HTTP.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, RequestError> {
        let (name, value) = parse_header(name, value)?;
        Ok(self.header(name, value))
    }

    /// Sets the timeout for this call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Username and password for HTTP basic authentication.
///
/// The password is redacted in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    /// Account name.
    pub username: String,
    /// Account password (sensitive, never log).
    pub password: String,
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A paced, retrying HTTP session.
///
/// `Session` is `Send + Sync`; share it behind an `Arc` to issue requests
/// from several tasks. Requests from all tasks are serialized through the
/// session's pacing controller.
pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) client: Client,
    pub(crate) headers: RwLock<HeaderMap>,
    pub(crate) cookies: Arc<SessionCookies>,
    pub(crate) basic_auth: RwLock<Option<BasicCredentials>>,
    pub(crate) mounts: MountTable,
    pub(crate) pacing: Mutex<PacingController>,
    pub(crate) media: Arc<dyn MediaBackend>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("cookies", &self.cookies)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with the default browser headers and one retry
    /// adapter mounted for each of `http://` and `https://`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ClientBuild`] if the HTTP client cannot be built.
    #[instrument(skip_all, fields(retries = config.retries, min_gap_ms = config.min_request_gap.as_millis()))]
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let mounts = MountTable::with_default(&config.transport());
        let session = Self::assemble(
            config,
            default_browser_headers(FALLBACK_USER_AGENT),
            Arc::new(SessionCookies::new()),
            None,
            mounts,
        )?;
        info!("session initialized");
        Ok(session)
    }

    pub(crate) fn assemble(
        config: SessionConfig,
        headers: HeaderMap,
        cookies: Arc<SessionCookies>,
        basic_auth: Option<BasicCredentials>,
        mounts: MountTable,
    ) -> Result<Self, SessionError> {
        let client = build_client(Arc::clone(&cookies))?;
        Ok(Self {
            pacing: Mutex::new(PacingController::new(config.min_request_gap)),
            config,
            client,
            headers: RwLock::new(headers),
            cookies,
            basic_auth: RwLock::new(basic_auth),
            mounts,
            media: Arc::new(YtDlp::default()),
        })
    }

    /// Replaces the media backend used by [`video`](Self::video).
    #[must_use]
    pub fn with_media_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.media = backend;
        self
    }

    /// Returns the construction settings.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the mounted transport adapters.
    #[must_use]
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Mounts a transport adapter for URLs starting with `prefix`.
    pub fn mount(&mut self, prefix: impl Into<String>, transport: RetryTransport) {
        let prefix = prefix.into();
        debug!(prefix = %prefix, "transport adapter mounted");
        self.mounts.mount(prefix, transport);
    }

    /// Returns a copy of the default headers.
    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the session cookie jar.
    #[must_use]
    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    /// Returns the configured basic-auth credentials, if any.
    #[must_use]
    pub fn basic_auth(&self) -> Option<BasicCredentials> {
        self.basic_auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns a copy of the current rate-limit state.
    pub async fn rate_limit_state(&self) -> RateLimitState {
        self.pacing.lock().await.limits().clone()
    }

    /// Merges headers into the session defaults. Later values win.
    ///
    /// Nothing is applied if any pair is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidHeader`] for the first invalid name or value.
    pub fn update_header<I, K, V>(&self, headers: I) -> Result<(), RequestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = headers
            .into_iter()
            .map(|(name, value)| parse_header(name.as_ref(), value.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut defaults = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in parsed {
            defaults.insert(name, value);
        }
        debug!("session header updated");
        Ok(())
    }

    /// Merges cookies into the session jar. Later values win.
    pub fn update_cookies<I, C>(&self, cookies: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<CookieInput>,
    {
        let merged = self
            .cookies
            .merge(cookies.into_iter().map(|c| c.into().into_cookie()));
        debug!(merged, "session cookies updated");
    }

    /// Enables HTTP basic authentication, replacing any bearer token.
    pub fn setup_auth_basic(&self, username: impl Into<String>, password: impl Into<String>) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(AUTHORIZATION);
        *self.basic_auth.write().unwrap_or_else(PoisonError::into_inner) = Some(BasicCredentials {
            username: username.into(),
            password: password.into(),
        });
        debug!("basic authentication enabled");
    }

    /// Enables OAuth2 bearer authentication, replacing any basic credentials.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidHeader`] if the token is not a valid header value.
    pub fn setup_auth_oauth2(&self, token: &str) -> Result<(), RequestError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| RequestError::invalid_header(AUTHORIZATION.as_str()))?;
        value.set_sensitive(true);
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(AUTHORIZATION, value);
        *self.basic_auth.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!("OAuth2 authentication enabled");
        Ok(())
    }

    /// Replaces the User-Agent with the newest published one for `browser`.
    ///
    /// The fetch is not paced; a failed fetch keeps the fallback agent.
    pub async fn refresh_user_agent(&self, browser: &str) {
        let agent = latest_user_agent(&self.client, browser).await;
        self.apply_user_agent(&agent);
    }

    /// Same as [`refresh_user_agent`](Self::refresh_user_agent), reading the
    /// published list from `source_url`.
    pub async fn refresh_user_agent_from(&self, source_url: &str, browser: &str) {
        let agent = fetch_user_agent(&self.client, source_url, browser).await;
        self.apply_user_agent(&agent);
    }

    fn apply_user_agent(&self, agent: &str) {
        if let Ok(value) = HeaderValue::from_str(&agent) {
            self.headers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(USER_AGENT, value);
            debug!(user_agent = agent, "user agent refreshed");
        }
    }

    /// Sends a paced GET request.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the URL is invalid, the transport fails,
    /// or retries are exhausted.
    pub async fn get(&self, url: &str) -> Result<Response, RequestError> {
        self.get_with(url, &RequestOptions::default()).await
    }

    /// Sends a paced GET request with per-call options.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn get_with(&self, url: &str, options: &RequestOptions) -> Result<Response, RequestError> {
        self.execute(Method::GET, url, options).await
    }

    /// Sends a paced HEAD request.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn head(&self, url: &str) -> Result<Response, RequestError> {
        self.head_with(url, &RequestOptions::default()).await
    }

    /// Sends a paced HEAD request with per-call options.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn head_with(&self, url: &str, options: &RequestOptions) -> Result<Response, RequestError> {
        self.execute(Method::HEAD, url, options).await
    }

    /// Sends one GET per URL in random order and returns results in input order.
    ///
    /// Under [`ErrorPolicy::Raise`] the first failure aborts the batch. Under
    /// [`ErrorPolicy::Record`] a failed URL yields `None` and the batch always
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns the first failure when the session raises errors.
    #[instrument(skip_all, fields(count = urls.len()))]
    pub async fn bulk_get<S: AsRef<str>>(
        &self,
        urls: &[S],
        options: &RequestOptions,
    ) -> Result<Vec<Option<Response>>, RequestError> {
        let order = shuffled_indices(urls.len());
        let mut results: Vec<Option<Response>> = std::iter::repeat_with(|| None).take(urls.len()).collect();

        for index in order {
            let url = urls[index].as_ref();
            match self.get_with(url, options).await {
                Ok(response) => results[index] = Some(response),
                Err(error) => match self.config.error_policy {
                    ErrorPolicy::Raise => return Err(error),
                    ErrorPolicy::Record => {
                        warn!(url, error = %error, "recording failed request as empty result");
                    }
                },
            }
        }

        let failed = results.iter().filter(|r| r.is_none()).count();
        info!(succeeded = results.len() - failed, failed, "bulk request complete");
        Ok(results)
    }

    #[instrument(skip_all, fields(method = %method, url = %url))]
    async fn execute(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, RequestError> {
        let request = self.build_request(method, url, options)?;
        let transport = self
            .mounts
            .resolve(request.url().as_str())
            .ok_or_else(|| RequestError::invalid_url(url))?;

        let mut pacing = self.pacing.lock().await;
        let waited = pacing.before_request().await;
        debug!(waited_ms = waited.as_millis(), "dispatching");

        let result = transport.send(&self.client, request).await;
        match &result {
            Ok(response) => {
                pacing.observe_response(response.headers());
                info!(status = response.status().as_u16(), "request complete");
            }
            Err(error) => {
                if let Some(headers) = error.last_response_headers() {
                    pacing.observe_response(headers);
                }
                error!(error = %error, "request failed");
            }
        }
        result
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Request, RequestError> {
        let mut parsed = Url::parse(url).map_err(|_| RequestError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RequestError::invalid_url(url));
        }
        if !options.query.is_empty() {
            parsed.query_pairs_mut().extend_pairs(options.query.iter());
        }

        let mut headers = self.headers();
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self.client.request(method, parsed).headers(headers);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(credentials) = self.basic_auth() {
            builder = builder.basic_auth(credentials.username, Some(credentials.password));
        }
        builder
            .build()
            .map_err(|e| RequestError::transport(url, e))
    }
}

fn build_client(cookies: Arc<SessionCookies>) -> Result<Client, SessionError> {
    Client::builder()
        .cookie_provider(cookies)
        .gzip(true)
        .build()
        .map_err(SessionError::ClientBuild)
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), RequestError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| RequestError::invalid_header(name))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| RequestError::invalid_header(name))?;
    Ok((header_name, header_value))
}

/// Dispatch order for a batch: every index exactly once, randomly permuted.
fn shuffled_indices(len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut rand::thread_rng());
    order
}
