//! Search backend trait and configuration.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::url_normalize::host_matches;
use crate::{Result, SearchQuery, SearchResult};

/// Configuration for a search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name of the engine.
    pub name: String,
    /// Short identifier used in configuration and diagnostics (e.g. "ddg").
    pub shortcut: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Whether the engine is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Domains served by a per-site API backend. Empty for generic engines.
    #[serde(default)]
    pub sites: Vec<String>,
}

fn default_timeout() -> u64 {
    15
}

fn default_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            shortcut: String::new(),
            timeout: default_timeout(),
            enabled: true,
            sites: Vec::new(),
        }
    }
}

/// A search backend: one engine or site API behind a common interface.
///
/// Implementations translate a [`SearchQuery`] into the engine's request and
/// parse its response. They report failures with the error that matches
/// what went wrong ([`SearchError::HttpStatus`](crate::SearchError::HttpStatus)
/// for status codes, [`SearchError::Parse`](crate::SearchError::Parse) for
/// malformed pages) so the fallback chain can classify them.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Returns the engine configuration.
    fn config(&self) -> &EngineConfig;

    /// Performs a search and returns results in engine order.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>>;

    /// Returns the engine name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns the engine shortcut.
    fn shortcut(&self) -> &str {
        &self.config().shortcut
    }

    /// Returns whether the engine is enabled.
    fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Per-call time budget.
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config().timeout.max(1))
    }

    /// Whether this is a per-site API backend for the given `site:` host.
    fn serves_site(&self, site_host: &str) -> bool {
        self.config()
            .sites
            .iter()
            .any(|domain| host_matches(site_host, domain))
    }
}
