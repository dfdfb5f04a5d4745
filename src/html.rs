//! Parsed HTML responses.

use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode, Url};
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

use crate::error::RequestError;
use crate::session::{ErrorPolicy, RequestOptions, Session};

/// An HTML document together with the response it came from.
///
/// `Soup` is not `Send`: parse and query it on one task.
#[derive(Debug)]
pub struct Soup {
    document: Html,
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
}

impl Soup {
    /// Parses `body` as an HTML document.
    #[must_use]
    pub fn parse(body: &str, status: StatusCode, url: Url, headers: HeaderMap) -> Self {
        Self {
            document: Html::parse_document(body),
            status,
            url,
            headers,
        }
    }

    /// Returns the text of every element matching `css`, in document order.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidSelector`] if `css` does not parse.
    pub fn select(&self, css: &str) -> Result<Vec<String>, RequestError> {
        let selector = parse_selector(css)?;
        Ok(self
            .document
            .select(&selector)
            .map(|element| element.text().collect::<String>())
            .collect())
    }

    /// Returns the `attr` attribute of every element matching `css` that has it.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidSelector`] if `css` does not parse.
    pub fn select_attr(&self, css: &str, attr: &str) -> Result<Vec<String>, RequestError> {
        let selector = parse_selector(css)?;
        Ok(self
            .document
            .select(&selector)
            .filter_map(|element| element.value().attr(attr).map(str::to_string))
            .collect())
    }

    /// The document title, if any.
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.select("title")
            .ok()
            .and_then(|titles| titles.into_iter().next())
            .map(|title| title.trim().to_string())
    }

    /// The parsed document.
    #[must_use]
    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

fn parse_selector(css: &str) -> Result<Selector, RequestError> {
    Selector::parse(css).map_err(|e| RequestError::invalid_selector(css, e.to_string()))
}

/// Response pieces read off the wire before parsing.
struct RawPage {
    body: String,
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
}

impl RawPage {
    async fn read(response: Response) -> Result<Self, RequestError> {
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| RequestError::transport(url.as_str(), e))?;
        Ok(Self {
            body,
            status,
            url,
            headers,
        })
    }

    fn into_soup(self) -> Soup {
        Soup::parse(&self.body, self.status, self.url, self.headers)
    }
}

impl Session {
    /// Fetches `url` and parses the body as HTML.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the request or body read fails.
    #[instrument(skip(self))]
    pub async fn soup(&self, url: &str) -> Result<Soup, RequestError> {
        let response = self.get(url).await?;
        let page = RawPage::read(response).await?;
        debug!(bytes = page.body.len(), "parsing document");
        Ok(page.into_soup())
    }

    /// Fetches every URL through [`bulk_get`](Self::bulk_get) and parses the
    /// bodies. Results are in input order.
    ///
    /// A body that cannot be read follows the session's error policy, like a
    /// failed request.
    ///
    /// # Errors
    ///
    /// Returns the first failure when the session raises errors.
    #[instrument(skip_all, fields(count = urls.len()))]
    pub async fn bulk_soup<S: AsRef<str>>(&self, urls: &[S]) -> Result<Vec<Option<Soup>>, RequestError> {
        let responses = self.bulk_get(urls, &RequestOptions::default()).await?;

        let mut pages = Vec::with_capacity(responses.len());
        for response in responses {
            let page = match response {
                Some(response) => match RawPage::read(response).await {
                    Ok(page) => Some(page),
                    Err(error) if self.config.error_policy == ErrorPolicy::Record => {
                        warn!(error = %error, "recording unreadable body as empty result");
                        None
                    }
                    Err(error) => return Err(error),
                },
                None => None,
            };
            pages.push(page);
        }

        Ok(pages
            .into_iter()
            .map(|page| page.map(RawPage::into_soup))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> Catalog </title></head><body>
        <ul>
          <li class="item"><a href="/a">Alpha</a></li>
          <li class="item"><a href="/b">Beta</a></li>
          <li class="other">Gamma</li>
        </ul>
    </body></html>"#;

    fn soup() -> Soup {
        Soup::parse(
            PAGE,
            StatusCode::OK,
            Url::parse("https://example.com/catalog").unwrap(),
            HeaderMap::new(),
        )
    }

    #[test]
    fn test_select_returns_texts_in_order() {
        assert_eq!(soup().select("li.item").unwrap(), vec!["Alpha", "Beta"]);
    }

    #[test]
    fn test_select_attr_skips_missing() {
        assert_eq!(soup().select_attr("li a", "href").unwrap(), vec!["/a", "/b"]);
        assert!(soup().select_attr("li", "href").unwrap().is_empty());
    }

    #[test]
    fn test_select_invalid_selector() {
        let result = soup().select("li[");
        assert!(matches!(result, Err(RequestError::InvalidSelector { .. })));
    }

    #[test]
    fn test_title_trimmed() {
        assert_eq!(soup().title().as_deref(), Some("Catalog"));
    }

    #[test]
    fn test_soup_keeps_response_metadata() {
        let soup = soup();
        assert_eq!(soup.status(), StatusCode::OK);
        assert_eq!(soup.url().path(), "/catalog");
    }
}
