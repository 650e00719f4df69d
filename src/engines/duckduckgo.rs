//! DuckDuckGo search engine implementation.

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;

use super::{element_text, selector};
use crate::fetcher_http::{default_client, get_text};
use crate::url_normalize::unwrap_redirect;
use crate::{Engine, EngineConfig, Result, SearchQuery, SearchResult};

const BASE_URL: &str = "https://html.duckduckgo.com";

/// DuckDuckGo search engine (HTML endpoint). Secondary engine of the default chain.
pub struct DuckDuckGo {
    config: EngineConfig,
    client: Client,
    base_url: String,
}

impl DuckDuckGo {
    /// Creates a new DuckDuckGo engine.
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "DuckDuckGo".to_string(),
                shortcut: "ddg".to_string(),
                ..Default::default()
            },
            client: default_client(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for DuckDuckGo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for DuckDuckGo {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let mut url = format!(
            "{}/html/?q={}",
            self.base_url,
            urlencoding::encode(&query.engine_query())
        );
        if let Some(lang) = query.language() {
            url.push_str(&format!("&kl={}", urlencoding::encode(&ddg_region(lang))));
        }

        let html = get_text(&self.client, &url, &[]).await?;
        self.parse_results(&html)
    }
}

impl DuckDuckGo {
    fn parse_results(&self, html: &str) -> Result<Vec<SearchResult>> {
        let document = Html::parse_document(html);
        let result_selector = selector(".results .result, .result")?;
        let link_selector = selector("a.result__a[href], .result__title a[href]")?;
        let snippet_selector = selector(".result__snippet, .result__body")?;

        let mut results = Vec::new();

        for element in document.select(&result_selector) {
            let is_ad = element
                .value()
                .classes()
                .any(|c| c == "result--ad" || c == "result--ad--small");
            if is_ad {
                continue;
            }

            let Some(link) = element.select(&link_selector).next() else {
                continue;
            };
            let title = element_text(link);
            let url = resolve_href(link.value().attr("href").unwrap_or_default());

            let snippet = element
                .select(&snippet_selector)
                .next()
                .map(element_text)
                .unwrap_or_default();

            if !url.is_empty() && !title.is_empty() && url.starts_with("http") {
                let position = results.len() as u32 + 1;
                results.push(
                    SearchResult::new(url, title, snippet).with_engine(self.shortcut(), position),
                );
            }
        }

        Ok(results)
    }
}

/// Turns DuckDuckGo's `//duckduckgo.com/l/?uddg=` click-through links back
/// into the target URL.
fn resolve_href(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    unwrap_redirect(&absolute).unwrap_or(absolute)
}

/// `en-US` becomes `us-en`, DuckDuckGo's region code order.
fn ddg_region(lang: &str) -> String {
    match lang.split_once(['-', '_']) {
        Some((l, region)) => format!("{}-{}", region.to_ascii_lowercase(), l.to_ascii_lowercase()),
        None => format!("wt-{}", lang.to_ascii_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_HTML: &str = r#"
        <html><body><div class="results">
        <div class="result results_links result--ad">
            <h2 class="result__title"><a class="result__a" href="https://ads.example.com/">Sponsored</a></h2>
        </div>
        <div class="result results_links">
            <h2 class="result__title">
                <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">Rust Programming Language</a>
            </h2>
            <a class="result__snippet">A language empowering everyone.</a>
        </div>
        <div class="result results_links">
            <h2 class="result__title"><a class="result__a" href="https://crates.io/">crates.io</a></h2>
            <div class="result__body">The Rust community's crate registry</div>
        </div>
        </div></body></html>
    "#;

    #[test]
    fn test_duckduckgo_new() {
        let engine = DuckDuckGo::new();
        assert_eq!(engine.name(), "DuckDuckGo");
        assert_eq!(engine.shortcut(), "ddg");
    }

    #[test]
    fn test_parse_results_unwraps_redirects_and_skips_ads() {
        let engine = DuckDuckGo::new();
        let results = engine.parse_results(RESULTS_HTML).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(results[0].title, "Rust Programming Language");
        assert_eq!(results[0].snippet, "A language empowering everyone.");
        assert_eq!(results[0].position, 1);
        assert_eq!(results[1].url, "https://crates.io/");
        assert_eq!(results[1].snippet, "The Rust community's crate registry");
        assert_eq!(results[1].engine, "ddg");
    }

    #[test]
    fn test_parse_results_empty() {
        let engine = DuckDuckGo::new();
        assert!(engine.parse_results("<html></html>").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&rut=x"),
            "https://example.com/a"
        );
        assert_eq!(resolve_href("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn test_ddg_region() {
        assert_eq!(ddg_region("en-US"), "us-en");
        assert_eq!(ddg_region("zh_CN"), "cn-zh");
        assert_eq!(ddg_region("de"), "wt-de");
    }

    #[tokio::test]
    async fn test_search_against_mock() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "rust"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_HTML))
            .mount(&server)
            .await;

        let engine = DuckDuckGo::new().with_base_url(server.uri());
        let results = engine.search(&SearchQuery::new("rust")).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_forbidden_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let engine = DuckDuckGo::new().with_base_url(server.uri());
        let err = engine.search(&SearchQuery::new("rust")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
