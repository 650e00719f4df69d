//! Error types for the search and fetch library.

use serde::Serialize;
use thiserror::Error;

use crate::diagnostics::Diagnostics;

/// Result type alias for search and fetch operations.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Result type for top-level operations that always report diagnostics.
pub type Outcome<T> = std::result::Result<T, Failure>;

/// How the retry/fallback policy treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retry the same component with backoff.
    Retryable,
    /// Move on to the next component without retrying.
    Permanent,
    /// Stop; the failure is the final outcome.
    Terminal,
}

/// Errors that can occur during search and fetch operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Connection reset, refused, or interrupted mid-transfer.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Upstream answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Backend refused the request in a way retrying will not fix.
    #[error("Backend error: {0}")]
    PermanentBackend(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// A call exceeded its time budget.
    #[error("Search timeout exceeded")]
    Timeout,

    /// No engines configured.
    #[error("No search engines configured")]
    NoEngines,

    /// Every backend in the chain failed.
    #[error("All search backends exhausted after {attempts} attempts")]
    AllBackendsExhausted { attempts: usize },

    /// No extraction candidate cleared the quality thresholds.
    #[error("Insufficient extraction quality (best score {best_score}, {best_chars} chars)")]
    InsufficientQuality { best_score: u32, best_chars: usize },

    /// The response was an anti-bot challenge page.
    #[error("Challenge detected: {0}")]
    ChallengeDetected(String),

    /// Browser rendering did not finish in time.
    #[error("Browser fallback timed out after {0}ms")]
    BrowserFallbackTimeout(u64),

    /// Fetch could not produce content.
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Browser launch or page operation failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// Fetch target was rejected before any network call.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SearchError {
    /// Classifies this error for the retry/fallback policy.
    pub fn class(&self) -> FailureClass {
        match self {
            SearchError::TransientNetwork(_) | SearchError::Timeout => FailureClass::Retryable,
            SearchError::HttpStatus { status, .. } => {
                if *status == 429 || (500..600).contains(status) {
                    FailureClass::Retryable
                } else {
                    FailureClass::Permanent
                }
            }
            SearchError::Http(e) => classify_reqwest(e),
            SearchError::PermanentBackend(_) | SearchError::Parse(_) => FailureClass::Permanent,
            _ => FailureClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Converts a reqwest error into the transient/permanent taxonomy.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SearchError::Timeout;
        }
        if let Some(status) = err.status() {
            return SearchError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            return SearchError::TransientNetwork(err.to_string());
        }
        SearchError::Http(err)
    }
}

fn classify_reqwest(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() || err.is_connect() || err.is_body() {
        return FailureClass::Retryable;
    }
    match err.status() {
        Some(s) if s.as_u16() == 429 || s.is_server_error() => FailureClass::Retryable,
        Some(_) => FailureClass::Permanent,
        None => FailureClass::Permanent,
    }
}

/// A terminal failure paired with everything that was attempted.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Failure {
    pub error: SearchError,
    pub diagnostics: Diagnostics,
}

impl Failure {
    pub fn new(error: SearchError, diagnostics: Diagnostics) -> Self {
        Self { error, diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse() {
        let err = SearchError::Parse("invalid JSON".to_string());
        assert_eq!(err.to_string(), "Failed to parse response: invalid JSON");
    }

    #[test]
    fn test_error_display_http_status() {
        let err = SearchError::HttpStatus {
            status: 503,
            url: "https://search.brave.com/search".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503 from https://search.brave.com/search");
    }

    #[test]
    fn test_error_display_exhausted() {
        let err = SearchError::AllBackendsExhausted { attempts: 4 };
        assert_eq!(err.to_string(), "All search backends exhausted after 4 attempts");
    }

    #[test]
    fn test_error_display_insufficient_quality() {
        let err = SearchError::InsufficientQuality {
            best_score: 12,
            best_chars: 40,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient extraction quality (best score 12, 40 chars)"
        );
    }

    #[test]
    fn test_error_display_browser_timeout() {
        let err = SearchError::BrowserFallbackTimeout(60_000);
        assert_eq!(err.to_string(), "Browser fallback timed out after 60000ms");
    }

    #[test]
    fn test_error_display_no_engines() {
        let err = SearchError::NoEngines;
        assert_eq!(err.to_string(), "No search engines configured");
    }

    #[test]
    fn test_error_display_other() {
        let err = SearchError::Other("something went wrong".to_string());
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_status_classification() {
        let status = |s| SearchError::HttpStatus {
            status: s,
            url: String::new(),
        };
        assert_eq!(status(429).class(), FailureClass::Retryable);
        assert_eq!(status(500).class(), FailureClass::Retryable);
        assert_eq!(status(503).class(), FailureClass::Retryable);
        assert_eq!(status(403).class(), FailureClass::Permanent);
        assert_eq!(status(404).class(), FailureClass::Permanent);
    }

    #[test]
    fn test_transient_classification() {
        assert!(SearchError::Timeout.is_retryable());
        assert!(SearchError::TransientNetwork("connection reset".into()).is_retryable());
        assert_eq!(
            SearchError::Parse("no results container".into()).class(),
            FailureClass::Permanent
        );
        assert_eq!(
            SearchError::BrowserFallbackTimeout(1).class(),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_failure_displays_inner_error() {
        let failure = Failure::new(SearchError::NoEngines, Diagnostics::new());
        assert_eq!(failure.to_string(), "No search engines configured");
        assert!(failure.diagnostics.is_empty());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SearchError>();
        assert_send_sync::<Failure>();
    }
}
