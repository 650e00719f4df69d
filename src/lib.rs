//! # a3s-websearch
//!
//! Resilient web search and readable-page fetching for agents.
//!
//! - Multi-backend search with ordered fallback, bounded retry, and
//!   per-site API backends
//! - Result normalization, deduplication, and per-domain capping
//! - Optional LLM summary with citations merged into the results
//! - Page fetch with challenge detection, multi-strategy content extraction,
//!   and a one-shot headless browser fallback
//! - A stateless forwarding proxy with allow-list and private-host checks
//!
//! Every search and fetch returns [`Diagnostics`] describing the attempts
//! it made, including on failure.
//!
//! ## Example
//!
//! ```rust,no_run
//! use a3s_websearch::{Config, FetchRequest, Fetcher, Search, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.apply_env();
//!
//!     let search = Search::from_config(&config)?;
//!     let response = search
//!         .search(SearchQuery::new("tokio select macro"))
//!         .await
//!         .map_err(|f| f.error)?;
//!     for result in response.items() {
//!         println!("{}: {}", result.title, result.url);
//!     }
//!
//!     let fetcher = Fetcher::from_config(&config)?;
//!     let page = fetcher
//!         .fetch(FetchRequest::new("https://tokio.rs/tokio/tutorial"))
//!         .await
//!         .map_err(|f| f.error)?;
//!     println!("{}", page.page.content);
//!     Ok(())
//! }
//! ```

mod aggregator;
mod engine;
mod error;
mod query;
mod result;
mod search;

#[cfg(feature = "headless")]
pub mod browser;
pub mod challenge;
pub mod citations;
pub mod config;
pub mod diagnostics;
pub mod engines;
pub mod extract;
pub mod fetch;
pub mod fetcher;
pub mod fetcher_http;
pub mod forward;
pub mod proxy;
pub mod retry;
pub mod summarize;
pub mod url_normalize;

pub use aggregator::Aggregator;
pub use config::Config;
pub use diagnostics::{Attempt, AttemptOutcome, Diagnostics, Flag, Stage};
pub use engine::{Engine, EngineConfig};
pub use error::{Failure, FailureClass, Outcome, Result, SearchError};
pub use fetch::{FetchRequest, FetchResponse, Fetcher};
pub use fetcher::{FetchedPage, PageFetcher, PageRenderer};
pub use fetcher_http::HttpFetcher;
pub use proxy::{ForwardingEndpoint, ProxyConfig, ProxyProtocol};
pub use query::{QueryOperator, SearchQuery};
pub use result::{AiSummary, SearchResponse, SearchResult};
pub use retry::{Jitter, RetryPolicy};
pub use search::Search;
