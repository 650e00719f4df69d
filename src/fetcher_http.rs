//! HTTP-based page fetcher using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use tracing::debug;

use crate::fetcher::{FetchedPage, PageFetcher};
use crate::proxy::{ForwardingEndpoint, ProxyConfig};
use crate::{Result, SearchError};

/// Desktop Chrome user agent sent by default.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7";

/// Settings shared by every reqwest client the crate builds.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(15),
            proxy: None,
        }
    }
}

/// Builds a client with browser-like headers, compression, and the
/// configured outbound proxy.
pub fn build_client(options: &ClientOptions) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

    let mut builder = Client::builder()
        .user_agent(options.user_agent.as_str())
        .default_headers(headers)
        .timeout(options.timeout)
        .redirect(reqwest::redirect::Policy::limited(10));

    if let Some(ref proxy) = options.proxy {
        builder = builder.proxy(proxy.to_reqwest()?);
    }

    builder
        .build()
        .map_err(|e| SearchError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Client with default options, falling back to reqwest's defaults.
pub(crate) fn default_client() -> Client {
    build_client(&ClientOptions::default()).unwrap_or_default()
}

/// GETs `url` and returns the body of a successful response.
///
/// Transport errors and non-2xx statuses are mapped onto the
/// retryable/permanent taxonomy.
pub(crate) async fn get_text(client: &Client, url: &str, headers: &[(&str, &str)]) -> Result<String> {
    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let response = request.send().await.map_err(SearchError::from_transport)?;
    let status = response.status();
    if !status.is_success() {
        return Err(SearchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    response.text().await.map_err(SearchError::from_transport)
}

/// A page fetcher that uses plain HTTP requests via reqwest.
///
/// When a [`ForwardingEndpoint`] is set, every request goes to
/// `{endpoint}?url=<target>` instead of the target itself.
pub struct HttpFetcher {
    client: Client,
    forwarding: Option<ForwardingEndpoint>,
}

impl HttpFetcher {
    /// Creates a new `HttpFetcher` with default settings.
    pub fn new() -> Self {
        Self::with_client(default_client())
    }

    /// Creates an `HttpFetcher` with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            forwarding: None,
        }
    }

    /// Routes requests through a forwarding proxy.
    pub fn with_forwarding(mut self, endpoint: ForwardingEndpoint) -> Self {
        self.forwarding = Some(endpoint);
        self
    }

    pub fn forwarding(&self) -> Option<&ForwardingEndpoint> {
        self.forwarding.as_ref()
    }

    fn request_url(&self, target: &str) -> String {
        match self.forwarding {
            Some(ref endpoint) => endpoint.target_url(target),
            None => target.to_string(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<FetchedPage> {
        let request_url = self.request_url(url);
        debug!(url, via_forwarding = self.forwarding.is_some(), "fetching page");

        let mut request = self.client.get(&request_url);
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SearchError::InvalidUrl(format!("bad header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SearchError::InvalidUrl(format!("bad header value: {e}")))?;
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(SearchError::from_transport)?;
        let status = response.status().as_u16();
        let final_url = if self.forwarding.is_some() {
            url.to_string()
        } else {
            response.url().to_string()
        };
        let response_headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(SearchError::from_transport)?;

        Ok(FetchedPage {
            url: final_url,
            status,
            headers: response_headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_client_default() {
        assert!(build_client(&ClientOptions::default()).is_ok());
    }

    #[test]
    fn test_build_client_with_proxy() {
        let options = ClientOptions {
            proxy: Some(ProxyConfig::new("127.0.0.1", 7890)),
            ..Default::default()
        };
        assert!(build_client(&options).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_returns_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .and(header("x-test", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><body>Hello</body></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new();
        let page = fetcher
            .fetch(
                &format!("{}/article", server.uri()),
                &[("x-test".to_string(), "1".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.header("content-type"), Some("text/html"));
        assert!(page.body.contains("Hello"));
    }

    #[tokio::test]
    async fn test_fetch_does_not_fail_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Just a moment..."))
            .mount(&server)
            .await;

        let page = HttpFetcher::new().fetch(&server.uri(), &[]).await.unwrap();
        assert_eq!(page.status, 403);
        assert_eq!(page.body, "Just a moment...");
    }

    #[tokio::test]
    async fn test_fetch_through_forwarding_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("url", "https://example.com/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("proxied"))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = ForwardingEndpoint::new(server.uri()).unwrap();
        let fetcher = HttpFetcher::new().with_forwarding(endpoint);
        let page = fetcher.fetch("https://example.com/page", &[]).await.unwrap();

        assert_eq!(page.body, "proxied");
        assert_eq!(page.url, "https://example.com/page");
    }

    #[tokio::test]
    async fn test_get_text_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = get_text(&default_client(), &server.uri(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::HttpStatus { status: 429, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let err = HttpFetcher::new()
            .fetch("http://127.0.0.1:1/", &[])
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err:?}");
    }
}
