//! Brave search engine implementation.

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;

use super::{element_text, selector};
use crate::fetcher_http::{default_client, get_text};
use crate::url_normalize::{host_of, host_matches};
use crate::{Engine, EngineConfig, Result, SearchQuery, SearchResult};

const BASE_URL: &str = "https://search.brave.com";

/// Brave search engine (HTML results page). Primary engine of the default chain.
pub struct Brave {
    config: EngineConfig,
    client: Client,
    base_url: String,
}

impl Brave {
    /// Creates a new Brave engine.
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "Brave".to_string(),
                shortcut: "brave".to_string(),
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

    /// Uses a shared, pre-configured client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Points the engine at another host (mirrors, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for Brave {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for Brave {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let mut url = format!(
            "{}/search?q={}&source=web",
            self.base_url,
            urlencoding::encode(&query.engine_query())
        );
        if query.page() > 1 {
            url.push_str(&format!("&offset={}", query.page() - 1));
        }

        let html = get_text(&self.client, &url, &[]).await?;
        self.parse_results(&html)
    }
}

impl Brave {
    fn parse_results(&self, html: &str) -> Result<Vec<SearchResult>> {
        let document = Html::parse_document(html);

        let web_selector = selector(r#"[data-type="web"]"#)?;
        let snippet_selector = selector(".snippet")?;
        let link_selector = selector(r#"a[href^="http"]"#)?;
        let title_selector = selector(".search-snippet-title, .snippet-title, .title")?;
        let desc_selector = selector(
            ".generic-snippet .content, .snippet-description, .snippet-content, .description",
        )?;

        let mut blocks: Vec<_> = document.select(&web_selector).collect();
        if blocks.is_empty() {
            blocks = document.select(&snippet_selector).collect();
        }

        let mut results = Vec::new();
        for block in blocks {
            let Some(link) = block.select(&link_selector).next() else {
                continue;
            };
            let url = link.value().attr("href").unwrap_or_default().to_string();
            if host_of(&url).is_some_and(|h| host_matches(&h, "brave.com")) {
                continue;
            }

            let title = block
                .select(&title_selector)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| element_text(link));

            let snippet = block
                .select(&desc_selector)
                .next()
                .map(element_text)
                .unwrap_or_default();

            if !url.is_empty() && !title.is_empty() {
                let position = results.len() as u32 + 1;
                results.push(SearchResult::new(url, title, snippet).with_engine(self.shortcut(), position));
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS_HTML: &str = r#"
        <html><body>
        <div class="snippet" data-type="web">
            <a href="https://www.rust-lang.org/"><div class="search-snippet-title">Rust Programming Language</div></a>
            <div class="generic-snippet"><div class="content">A systems programming language focused on safety.</div></div>
        </div>
        <div class="snippet" data-type="web">
            <a href="https://doc.rust-lang.org/book/" class="search-snippet-title">The Rust Book</a>
            <div class="snippet-description">Official Rust programming guide.</div>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_brave_new() {
        let engine = Brave::new();
        assert_eq!(engine.config.name, "Brave");
        assert_eq!(engine.config.shortcut, "brave");
        assert_eq!(engine.base_url, BASE_URL);
    }

    #[test]
    fn test_brave_with_config() {
        let custom_config = EngineConfig {
            name: "Custom Brave".to_string(),
            ..Default::default()
        };
        let engine = Brave::new().with_config(custom_config);
        assert_eq!(engine.name(), "Custom Brave");
    }

    #[test]
    fn test_brave_parse_results_empty() {
        let engine = Brave::new();
        let results = engine.parse_results("<html><body></body></html>").unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_brave_parse_results_with_data() {
        let engine = Brave::new();
        let results = engine.parse_results(RESULTS_HTML).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Rust Programming Language");
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            results[0].snippet,
            "A systems programming language focused on safety."
        );
        assert_eq!(results[0].engine, "brave");
        assert_eq!(results[0].position, 1);
        assert_eq!(results[1].title, "The Rust Book");
        assert_eq!(results[1].snippet, "Official Rust programming guide.");
        assert_eq!(results[1].position, 2);
    }

    #[test]
    fn test_brave_parse_results_skips_non_web() {
        let engine = Brave::new();
        let html = r#"
        <html><body>
        <div class="snippet" data-type="video">
            <a href="https://example.com/video" class="search-snippet-title">A Video</a>
        </div>
        <div class="snippet" data-type="web">
            <a href="https://example.com/page" class="search-snippet-title">A Page</a>
        </div>
        </body></html>
        "#;
        let results = engine.parse_results(html).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "A Page");
    }

    #[test]
    fn test_brave_falls_back_to_snippet_blocks() {
        let engine = Brave::new();
        let html = r#"
        <div class="snippet">
            <a href="https://search.brave.com/settings">Settings</a>
        </div>
        <div class="snippet">
            <a href="https://tokio.rs/"><span class="title">Tokio</span></a>
            <p class="snippet-content">An asynchronous runtime.</p>
        </div>
        "#;
        let results = engine.parse_results(html).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://tokio.rs/");
        assert_eq!(results[0].title, "Tokio");
        assert_eq!(results[0].snippet, "An asynchronous runtime.");
    }

    #[tokio::test]
    async fn test_brave_search_sends_operators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "tokio site:docs.rs"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_HTML))
            .expect(1)
            .mount(&server)
            .await;

        let engine = Brave::new().with_base_url(server.uri());
        let results = engine
            .search(&SearchQuery::new("tokio site:docs.rs"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_brave_search_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let engine = Brave::new().with_base_url(server.uri());
        let err = engine.search(&SearchQuery::new("rust")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
