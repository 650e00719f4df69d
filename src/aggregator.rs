//! Result merging: dedup by normalized URL and per-domain capping.

use std::collections::HashMap;

use crate::SearchResult;

/// Merges ordered result lists into one deduplicated list.
///
/// Lists are consumed in the order given and each list in its own order, so
/// the output keeps first-seen order across sources. A result whose
/// registrable domain has already reached `max_per_domain` is dropped.
#[derive(Debug, Clone)]
pub struct Aggregator {
    /// Results allowed per registrable domain. `0` disables the cap.
    max_per_domain: usize,
    /// Maximum merged length. `None` keeps everything.
    limit: Option<usize>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            max_per_domain: 2,
            limit: None,
        }
    }
}

impl Aggregator {
    /// Creates an aggregator with the default cap of two per domain.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_per_domain(mut self, cap: usize) -> Self {
        self.max_per_domain = cap;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn max_per_domain(&self) -> usize {
        self.max_per_domain
    }

    /// Merges `lists` into one list.
    ///
    /// Each kept result has its URL replaced by the normalized form. When a
    /// duplicate turns up later, the first entry keeps its position but
    /// takes the longer title and snippet of the two.
    pub fn merge(&self, lists: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut index_by_url: HashMap<String, usize> = HashMap::new();
        let mut per_domain: HashMap<String, usize> = HashMap::new();

        for result in lists.into_iter().flatten() {
            let normalized = result.normalized_url();
            if normalized.is_empty() {
                continue;
            }

            if let Some(&index) = index_by_url.get(&normalized) {
                merge_into(&mut merged[index], result);
                continue;
            }

            if self.limit.is_some_and(|limit| merged.len() >= limit) {
                continue;
            }

            let domain = result.domain().unwrap_or_else(|| normalized.clone());
            let seen = per_domain.entry(domain).or_insert(0);
            if self.max_per_domain > 0 && *seen >= self.max_per_domain {
                continue;
            }
            *seen += 1;

            let mut result = result;
            result.url = normalized.clone();
            index_by_url.insert(normalized, merged.len());
            merged.push(result);
        }

        merged
    }
}

fn merge_into(existing: &mut SearchResult, other: SearchResult) {
    if other.title.chars().count() > existing.title.chars().count() {
        existing.title = other.title;
    }
    if other.snippet.chars().count() > existing.snippet.chars().count() {
        existing.snippet = other.snippet;
    }
    if existing.published_date.is_none() {
        existing.published_date = other.published_date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, engine: &str) -> SearchResult {
        SearchResult::new(url, format!("Title {url}"), "").with_engine(engine, 1)
    }

    fn urls(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.url.as_str()).collect()
    }

    #[test]
    fn test_dedup_keeps_first_seen() {
        let aggregator = Aggregator::new().with_max_per_domain(0);
        let merged = aggregator.merge(vec![
            vec![
                result("https://a.com/x?utm_source=feed", "brave"),
                result("https://b.com/", "brave"),
            ],
            vec![result("https://a.com/x", "ddg"), result("https://c.com/", "ddg")],
        ]);

        assert_eq!(urls(&merged), vec!["https://a.com/x", "https://b.com/", "https://c.com/"]);
        assert_eq!(merged[0].engine, "brave");
    }

    #[test]
    fn test_duplicate_contributes_longer_text() {
        let aggregator = Aggregator::new();
        let first = SearchResult::new("https://a.com/page", "Short", "");
        let second = SearchResult::new("https://a.com/page/", "A much longer title", "Snippet")
            .with_published_date("2024-01-01");
        let merged = aggregator.merge(vec![vec![first], vec![second]]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "A much longer title");
        assert_eq!(merged[0].snippet, "Snippet");
        assert_eq!(merged[0].published_date.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn test_per_domain_cap_preserves_other_order() {
        let aggregator = Aggregator::new().with_max_per_domain(2);
        let merged = aggregator.merge(vec![vec![
            result("https://docs.rs/tokio", "brave"),
            result("https://rust-lang.org/", "brave"),
            result("https://docs.rs/serde", "brave"),
            result("https://www.docs.rs/axum", "brave"),
            result("https://crates.io/", "brave"),
            result("https://docs.rs/reqwest", "brave"),
            result("https://tokio.rs/", "brave"),
        ]]);

        assert_eq!(
            urls(&merged),
            vec![
                "https://docs.rs/tokio",
                "https://rust-lang.org/",
                "https://docs.rs/serde",
                "https://crates.io/",
                "https://tokio.rs/",
            ]
        );
    }

    #[test]
    fn test_cap_counts_registrable_domain() {
        let aggregator = Aggregator::new().with_max_per_domain(1);
        let merged = aggregator.merge(vec![vec![
            result("https://blog.example.co.uk/a", "brave"),
            result("https://shop.example.co.uk/b", "brave"),
            result("https://other.co.uk/", "brave"),
        ]]);
        assert_eq!(urls(&merged), vec!["https://blog.example.co.uk/a", "https://other.co.uk/"]);
    }

    #[test]
    fn test_cap_disabled() {
        let aggregator = Aggregator::new().with_max_per_domain(0);
        let list = (0..5)
            .map(|i| result(&format!("https://github.com/org/repo{i}"), "brave"))
            .collect();
        assert_eq!(aggregator.merge(vec![list]).len(), 5);
    }

    #[test]
    fn test_limit_truncates_but_still_merges_duplicates() {
        let aggregator = Aggregator::new().with_max_per_domain(0).with_limit(2);
        let merged = aggregator.merge(vec![
            vec![result("https://a.com/", "brave"), result("https://b.com/", "brave")],
            vec![
                result("https://c.com/", "ddg"),
                SearchResult::new("https://a.com", "A longer title for a.com", ""),
            ],
        ]);
        assert_eq!(urls(&merged), vec!["https://a.com/", "https://b.com/"]);
        assert_eq!(merged[0].title, "A longer title for a.com");
    }

    #[test]
    fn test_skips_unparseable_urls() {
        let merged = Aggregator::new().merge(vec![vec![
            SearchResult::new("", "Empty", ""),
            result("https://a.com/", "brave"),
        ]]);
        assert_eq!(merged.len(), 1);
    }
}
