//! Session cookie jar.
//!
//! The jar is a flat name→value map: a cookie set on the session, either by
//! the caller or by a `Set-Cookie` response header, is sent with every
//! subsequent request regardless of host. The same [`SessionCookies`] instance
//! is installed as the HTTP client's cookie store, so cookies set on redirect
//! hops are captured as well.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use reqwest::Url;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A single name/value cookie.
///
/// The value is redacted in Debug output to avoid leaking session tokens
/// into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    pub value: String,
}

impl Cookie {
    /// Creates a cookie.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Accepted shapes of cookie input for [`Session::update_cookies`](crate::Session::update_cookies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieInput {
    /// A bare `(name, value)` pair.
    RawPair(String, String),
    /// A structured cookie record.
    Typed(Cookie),
}

impl CookieInput {
    /// Normalizes the input into a [`Cookie`].
    #[must_use]
    pub fn into_cookie(self) -> Cookie {
        match self {
            Self::RawPair(name, value) => Cookie { name, value },
            Self::Typed(cookie) => cookie,
        }
    }
}

impl From<Cookie> for CookieInput {
    fn from(cookie: Cookie) -> Self {
        Self::Typed(cookie)
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for CookieInput {
    fn from((name, value): (N, V)) -> Self {
        Self::RawPair(name.into(), value.into())
    }
}

/// Thread-safe cookie jar shared between a session and its HTTP client.
#[derive(Default)]
pub struct SessionCookies {
    jar: RwLock<HashMap<String, String>>,
}

impl fmt::Debug for SessionCookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookies")
            .field("names", &self.names())
            .finish()
    }
}

impl SessionCookies {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges cookies into the jar. Later entries win on duplicate names.
    pub fn merge<I>(&self, cookies: I) -> usize
    where
        I: IntoIterator<Item = Cookie>,
    {
        let mut jar = self
            .jar
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut merged = 0;
        for cookie in cookies {
            jar.insert(cookie.name, cookie.value);
            merged += 1;
        }
        merged
    }

    /// Returns the value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.jar
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Removes the cookie stored under `name`.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.jar
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name)
    }

    /// Number of cookies in the jar.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jar
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true when the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of every cookie, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Cookie> {
        let jar = self
            .jar
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut cookies: Vec<Cookie> = jar
            .iter()
            .map(|(name, value)| Cookie::new(name.clone(), value.clone()))
            .collect();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        cookies
    }

    fn names(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|c| c.name).collect()
    }

    /// Renders the jar as a `Cookie` request header value.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        let cookies = self.snapshot();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Applies one `Set-Cookie` header value to the jar.
    fn apply_set_cookie(&self, raw: &str) {
        let Some(parsed) = parse_set_cookie(raw) else {
            warn!("ignoring malformed Set-Cookie header");
            return;
        };
        match parsed {
            SetCookie::Store(cookie) => {
                debug!(name = %cookie.name, "cookie set by server");
                self.merge([cookie]);
            }
            SetCookie::Expire(name) => {
                debug!(name = %name, "cookie expired by server");
                self.remove(&name);
            }
        }
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, _url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.apply_set_cookie(raw);
            }
        }
    }

    fn cookies(&self, _url: &Url) -> Option<HeaderValue> {
        self.header_value()
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SetCookie {
    Store(Cookie),
    Expire(String),
}

/// Parses a `Set-Cookie` value, honoring `Max-Age` and `Expires` removals.
fn parse_set_cookie(raw: &str) -> Option<SetCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    for attribute in parts {
        let (key, attr_value) = attribute.split_once('=').unwrap_or((attribute, ""));
        let key = key.trim();
        let attr_value = attr_value.trim();
        if key.eq_ignore_ascii_case("max-age")
            && attr_value.parse::<i64>().is_ok_and(|age| age <= 0)
        {
            return Some(SetCookie::Expire(name.to_string()));
        }
        if key.eq_ignore_ascii_case("expires")
            && httpdate::parse_http_date(attr_value)
                .is_ok_and(|at| at <= std::time::SystemTime::now())
        {
            return Some(SetCookie::Expire(name.to_string()));
        }
    }

    Some(SetCookie::Store(Cookie::new(name, value)))
}
