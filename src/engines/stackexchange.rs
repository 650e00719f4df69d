//! StackExchange site backend (Stack Overflow and sister sites).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::strip_html_tags;
use crate::fetcher_http::{default_client, get_text};
use crate::url_normalize::host_matches;
use crate::{Engine, EngineConfig, Result, SearchError, SearchQuery, SearchResult};

const API_BASE: &str = "https://api.stackexchange.com/2.3";

/// Q&A search through the StackExchange API for `site:stackoverflow.com`,
/// `site:*.stackexchange.com` and the other network sites.
pub struct StackExchange {
    config: EngineConfig,
    client: Client,
    api_base: String,
}

impl StackExchange {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "StackExchange".to_string(),
                shortcut: "stackexchange".to_string(),
                timeout: 10,
                sites: vec![
                    "stackoverflow.com".to_string(),
                    "stackexchange.com".to_string(),
                    "superuser.com".to_string(),
                    "serverfault.com".to_string(),
                    "askubuntu.com".to_string(),
                ],
                ..Default::default()
            },
            client: default_client(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api_base = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for StackExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// API `site` parameter for a host (`unix.stackexchange.com` becomes `unix`).
fn api_site(host: &str) -> String {
    let host = host.trim_start_matches("www.").to_ascii_lowercase();
    if let Some(sub) = host.strip_suffix(".stackexchange.com") {
        return sub.to_string();
    }
    for site in ["stackoverflow", "superuser", "serverfault", "askubuntu"] {
        if host_matches(&host, &format!("{site}.com")) {
            return site.to_string();
        }
    }
    "stackoverflow".to_string()
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct ApiItem {
    title: String,
    link: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    is_answered: bool,
    #[serde(default)]
    answer_count: u32,
}

#[async_trait]
impl Engine for StackExchange {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        let site = api_site(query.site_host().unwrap_or("stackoverflow.com"));
        let pagesize = query.max_results().unwrap_or(10).clamp(1, 50);
        let url = format!(
            "{}/search/advanced?order=desc&sort=relevance&q={}&site={}&pagesize={}",
            self.api_base,
            urlencoding::encode(query.terms()),
            site,
            pagesize
        );

        let body = get_text(&self.client, &url, &[]).await?;
        let response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| SearchError::Parse(format!("StackExchange response: {e}")))?;
        if let Some(message) = response.error_message {
            return Err(SearchError::PermanentBackend(message));
        }

        Ok(response
            .items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut snippet = format!("score {}, {} answers", item.score, item.answer_count);
                if item.is_answered {
                    snippet.push_str(", answered");
                }
                if !item.tags.is_empty() {
                    snippet.push_str(&format!(" [{}]", item.tags.join(", ")));
                }
                SearchResult::new(item.link, strip_html_tags(&item.title), snippet)
                    .with_engine(self.shortcut(), i as u32 + 1)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_api_site() {
        assert_eq!(api_site("stackoverflow.com"), "stackoverflow");
        assert_eq!(api_site("www.stackoverflow.com"), "stackoverflow");
        assert_eq!(api_site("unix.stackexchange.com"), "unix");
        assert_eq!(api_site("superuser.com"), "superuser");
        assert_eq!(api_site("example.com"), "stackoverflow");
    }

    #[test]
    fn test_serves_sites() {
        let engine = StackExchange::new();
        assert!(engine.serves_site("stackoverflow.com"));
        assert!(engine.serves_site("rust.stackexchange.com"));
        assert!(!engine.serves_site("github.com"));
    }

    #[tokio::test]
    async fn test_search_maps_items() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/advanced"))
            .and(query_param("site", "unix"))
            .and(query_param("q", "tmux scrollback"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "title": "How do I increase the scrollback buffer in tmux?",
                    "link": "https://unix.stackexchange.com/questions/43414",
                    "tags": ["tmux"],
                    "score": 120,
                    "is_answered": true,
                    "answer_count": 4
                }],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let engine = StackExchange::new().with_base_url(server.uri());
        let results = engine
            .search(&SearchQuery::new("tmux scrollback site:unix.stackexchange.com"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://unix.stackexchange.com/questions/43414");
        assert_eq!(results[0].snippet, "score 120, 4 answers, answered [tmux]");
        assert_eq!(results[0].engine, "stackexchange");
    }

    #[tokio::test]
    async fn test_api_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_id": 502,
                "error_message": "too many requests from this IP"
            })))
            .mount(&server)
            .await;

        let engine = StackExchange::new().with_base_url(server.uri());
        let err = engine.search(&SearchQuery::new("rust")).await.unwrap_err();
        assert!(matches!(err, SearchError::PermanentBackend(_)));
    }
}
