//! Wikipedia site backend using the MediaWiki search API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::strip_html_tags;
use crate::fetcher_http::{default_client, get_text};
use crate::{Engine, EngineConfig, Result, SearchError, SearchQuery, SearchResult};

/// Wikipedia search engine using the MediaWiki API.
///
/// Serves `site:wikipedia.org` queries; a language subdomain in the site
/// restriction (`site:de.wikipedia.org`) selects that edition.
pub struct Wikipedia {
    config: EngineConfig,
    client: Client,
    language: String,
    base_url: Option<String>,
}

impl Wikipedia {
    /// Creates a new Wikipedia engine.
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "Wikipedia".to_string(),
                shortcut: "wikipedia".to_string(),
                timeout: 10,
                sites: vec!["wikipedia.org".to_string()],
                ..Default::default()
            },
            client: default_client(),
            language: "en".to_string(),
            base_url: None,
        }
    }

    /// Sets the default Wikipedia language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
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

    /// Overrides the API host for every language (tests, mirrors).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn language_for(&self, query: &SearchQuery) -> String {
        query
            .site_host()
            .and_then(|host| host.strip_suffix(".wikipedia.org"))
            .filter(|sub| !sub.is_empty() && !sub.contains('.') && *sub != "www" && *sub != "m")
            .map(str::to_string)
            .unwrap_or_else(|| self.language.clone())
    }
}

impl Default for Wikipedia {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct WikiResponse {
    query: Option<WikiQuery>,
}

#[derive(Deserialize)]
struct WikiQuery {
    search: Vec<WikiSearchResult>,
}

#[derive(Deserialize)]
struct WikiSearchResult {
    title: String,
    snippet: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[async_trait]
impl Engine for Wikipedia {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let language = self.language_for(query);
        let site = format!("https://{language}.wikipedia.org");
        let api_base = self.base_url.clone().unwrap_or_else(|| site.clone());
        let limit = query.max_results().unwrap_or(10).clamp(1, 50);
        let url = format!(
            "{api_base}/w/api.php?action=query&list=search&srsearch={}&format=json&srlimit={limit}",
            urlencoding::encode(query.terms())
        );

        let body = get_text(&self.client, &url, &[]).await?;
        let wiki_response: WikiResponse = serde_json::from_str(&body)
            .map_err(|e| SearchError::Parse(format!("Wikipedia response: {e}")))?;

        let results = wiki_response
            .query
            .map(|q| {
                q.search
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let url = format!("{site}/wiki/{}", item.title.replace(' ', "_"));
                        let snippet = strip_html_tags(&item.snippet);
                        let mut result = SearchResult::new(url, item.title, snippet)
                            .with_engine(self.shortcut(), i as u32 + 1);
                        if let Some(ts) = item.timestamp {
                            result = result.with_published_date(ts);
                        }
                        result
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}
