//! Search query representation and structured operator parsing.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(^|\s)(-?)(site|filetype)\s*:\s*(\S+)").expect("operator regex is valid")
});

/// A structured operator lifted out of the free-text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum QueryOperator {
    /// Restrict results to a host or host/path prefix.
    Site(String),
    /// Exclude a host.
    ExcludeSite(String),
    /// Restrict results to a file type.
    FileType(String),
}

impl QueryOperator {
    /// Renders the operator in the common engine syntax.
    pub fn render(&self) -> String {
        match self {
            QueryOperator::Site(s) => format!("site:{s}"),
            QueryOperator::ExcludeSite(s) => format!("-site:{s}"),
            QueryOperator::FileType(t) => format!("filetype:{t}"),
        }
    }
}

/// A search query. Built once per request and then only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    raw: String,
    terms: String,
    operators: Vec<QueryOperator>,
    max_results: Option<usize>,
    language: Option<String>,
    page: u32,
}

impl SearchQuery {
    /// Parses free text, lifting `site:`, `-site:` and `filetype:` out of it.
    pub fn new(query: impl Into<String>) -> Self {
        let raw = query.into();
        let (terms, operators) = parse_operators(&raw);
        Self {
            raw,
            terms,
            operators,
            max_results: None,
            language: None,
            page: 1,
        }
    }

    /// Adds a site restriction in addition to any parsed from the text.
    pub fn with_site(mut self, site: impl AsRef<str>) -> Self {
        let site = clean_site(site.as_ref());
        if !site.is_empty() {
            self.operators.push(QueryOperator::Site(site));
        }
        self
    }

    /// Sets the maximum number of results wanted.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Sets the language/locale (e.g. "en-US").
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Sets the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// The text exactly as the caller supplied it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The free-text terms with operators removed.
    pub fn terms(&self) -> &str {
        &self.terms
    }

    pub fn operators(&self) -> &[QueryOperator] {
        &self.operators
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// The first site restriction, if any.
    pub fn site(&self) -> Option<&str> {
        self.operators.iter().find_map(|op| match op {
            QueryOperator::Site(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Host part of the site restriction (`github.com/rust-lang` gives
    /// `github.com`).
    pub fn site_host(&self) -> Option<&str> {
        self.site().map(|s| s.split('/').next().unwrap_or(s))
    }

    pub fn is_site_query(&self) -> bool {
        self.site().is_some()
    }

    /// Terms followed by the operators in engine syntax.
    pub fn engine_query(&self) -> String {
        let mut parts = Vec::with_capacity(self.operators.len() + 1);
        if !self.terms.is_empty() {
            parts.push(self.terms.clone());
        }
        parts.extend(self.operators.iter().map(QueryOperator::render));
        parts.join(" ")
    }

    /// Whether there is anything to search for.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.operators.is_empty()
    }
}

fn parse_operators(raw: &str) -> (String, Vec<QueryOperator>) {
    let mut operators = Vec::new();
    for caps in OPERATOR_RE.captures_iter(raw) {
        let negated = !caps[2].is_empty();
        let value = &caps[4];
        let op = match (caps[3].to_ascii_lowercase().as_str(), negated) {
            ("site", false) => QueryOperator::Site(clean_site(value)),
            ("site", true) => QueryOperator::ExcludeSite(clean_site(value)),
            ("filetype", _) => {
                QueryOperator::FileType(value.trim_start_matches('.').to_ascii_lowercase())
            }
            _ => continue,
        };
        operators.push(op);
    }

    let stripped = OPERATOR_RE.replace_all(raw, " ");
    let terms = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (terms, operators)
}

fn clean_site(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value);
    value
        .trim_start_matches("*.")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}
