//! Retrieval abstractions: plain HTTP page fetches and headless rendering.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// A raw HTTP response as seen by the challenge detector and extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    /// Response headers with lowercased names.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Retrieves a URL over plain HTTP.
///
/// Implementations return the page for any status code; deciding whether a
/// 403 or 503 is a challenge, a retryable fault, or a permanent refusal is
/// left to the caller.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`, adding `headers` on top of the client defaults.
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<FetchedPage>;
}

/// Renders a URL in a headless browser.
///
/// `challenge_wait` bounds how long the renderer waits for an interstitial
/// challenge to clear before returning whatever the page shows.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Loads `url` and returns the rendered HTML.
    async fn render(&self, url: &str, challenge_wait: Duration) -> Result<String>;
}
