//! Search result types.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::url_normalize::{domain_key, normalize_url};

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result URL.
    pub url: String,
    /// Result title.
    pub title: String,
    /// Result description/snippet.
    pub snippet: String,
    /// Identifier of the backend that produced this result.
    pub engine: String,
    /// 1-based position in that backend's list.
    pub position: u32,
    /// Published date, when the backend exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
}

impl SearchResult {
    /// Creates a new search result.
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            engine: String::new(),
            position: 0,
            published_date: None,
        }
    }

    /// Sets the originating backend and its position.
    pub fn with_engine(mut self, engine: impl Into<String>, position: u32) -> Self {
        self.engine = engine.into();
        self.position = position;
        self
    }

    /// Sets the published date.
    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = Some(date.into());
        self
    }

    /// Returns the canonical URL used as the dedup identity.
    pub fn normalized_url(&self) -> String {
        normalize_url(&self.url)
    }

    /// Registrable domain of the canonical URL.
    pub fn domain(&self) -> Option<String> {
        domain_key(&self.normalized_url())
    }
}

/// Text produced by the AI summarization path, with its citations kept
/// apart from the organic ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSummary {
    /// Summary body with link markup and the sources block removed.
    pub text: String,
    /// Deduplicated, capped list of cited sources.
    pub citations: Vec<SearchResult>,
}

/// Response of a search operation.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<AiSummary>,
    diagnostics: Diagnostics,
    /// Search duration in milliseconds.
    pub duration_ms: u64,
}

impl SearchResponse {
    pub(crate) fn new(
        results: Vec<SearchResult>,
        summary: Option<AiSummary>,
        diagnostics: Diagnostics,
        duration_ms: u64,
    ) -> Self {
        Self {
            results,
            summary,
            diagnostics,
            duration_ms,
        }
    }

    /// Returns the organic results.
    pub fn items(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the AI summary when the summarization path produced one.
    pub fn summary(&self) -> Option<&AiSummary> {
        self.summary.as_ref()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Splits the response into results, summary, and diagnostics.
    pub fn into_parts(self) -> (Vec<SearchResult>, Option<AiSummary>, Diagnostics) {
        (self.results, self.summary, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_result_new() {
        let result = SearchResult::new("https://example.com", "Title", "Snippet");
        assert_eq!(result.url, "https://example.com");
        assert_eq!(result.title, "Title");
        assert_eq!(result.snippet, "Snippet");
        assert!(result.engine.is_empty());
        assert_eq!(result.position, 0);
        assert!(result.published_date.is_none());
    }

    #[test]
    fn test_search_result_with_engine() {
        let result = SearchResult::new("https://example.com", "Title", "")
            .with_engine("brave", 3)
            .with_published_date("2024-05-01");
        assert_eq!(result.engine, "brave");
        assert_eq!(result.position, 3);
        assert_eq!(result.published_date.as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn test_normalized_url() {
        let a = SearchResult::new("https://Example.com/page/?utm_source=x", "", "");
        let b = SearchResult::new("https://example.com/page", "", "");
        assert_eq!(a.normalized_url(), b.normalized_url());
    }

    #[test]
    fn test_domain() {
        let result = SearchResult::new("https://www.rust-lang.org/learn", "", "");
        assert_eq!(result.domain().as_deref(), Some("rust-lang.org"));
    }

    #[test]
    fn test_search_response_accessors() {
        let response = SearchResponse::new(
            vec![SearchResult::new("https://a.com", "A", "")],
            None,
            Diagnostics::new(),
            42,
        );
        assert_eq!(response.len(), 1);
        assert!(!response.is_empty());
        assert!(response.summary().is_none());
        assert_eq!(response.duration_ms, 42);

        let (results, summary, diagnostics) = response.into_parts();
        assert_eq!(results[0].title, "A");
        assert!(summary.is_none());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_search_response_serialization() {
        let response = SearchResponse::new(
            vec![SearchResult::new("https://a.com", "A", "s").with_engine("duckduckgo", 1)],
            Some(AiSummary {
                text: "Summary".to_string(),
                citations: vec![],
            }),
            Diagnostics::new(),
            5,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["results"][0]["engine"], "duckduckgo");
        assert_eq!(json["summary"]["text"], "Summary");
        assert!(json["results"][0].get("published_date").is_none());
    }
}
