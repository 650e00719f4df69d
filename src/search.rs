//! Search orchestration.
//!
//! The organic path walks the backend chain under the retry policy: per-site
//! API backends matching the query's `site:` host first, then the generic
//! engines in priority order. The optional summary path runs alongside it;
//! the two are joined before merging and neither can fail the other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diagnostics::{Attempt, AttemptOutcome, Diagnostics, Flag, Stage};
use crate::engines::{Brave, DuckDuckGo, StackExchange, Wikipedia};
use crate::fetcher_http::build_client;
use crate::retry::{retry_call, RetryPolicy};
use crate::summarize::{OpenAiSummarizer, Summarizer};
use crate::{
    Aggregator, AiSummary, Engine, EngineConfig, Failure, Outcome, Result, SearchError, SearchQuery,
    SearchResponse, SearchResult,
};

/// Multi-backend search with fallback, retry, and an optional AI summary.
pub struct Search {
    engines: Vec<Arc<dyn Engine>>,
    site_engines: Vec<Arc<dyn Engine>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    retry: RetryPolicy,
    limit: usize,
    max_per_domain: usize,
    timeout: Duration,
    summary_timeout: Duration,
}

impl Search {
    /// Creates a new search instance.
    pub fn new() -> Self {
        Self {
            engines: Vec::new(),
            site_engines: Vec::new(),
            summarizer: None,
            retry: RetryPolicy::default(),
            limit: 25,
            max_per_domain: 2,
            timeout: Duration::from_secs(60),
            summary_timeout: Duration::from_secs(60),
        }
    }

    /// Builds the default chain (configured engines, site backends, and the
    /// OpenAI-compatible summarizer when credentials are present).
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = &config.search;
        let client = build_client(&config.client_options(settings.engine_timeout())?)?;

        let mut search = Search::new();
        search.set_retry_policy(settings.retry.clone());
        search.set_limit(settings.result_limit);
        search.set_max_per_domain(settings.max_per_domain);
        search.set_timeout(settings.timeout());
        search.set_summary_timeout(config.llm.timeout().min(settings.timeout()));

        for name in &settings.engines {
            match name.as_str() {
                "brave" => {
                    let engine = Brave::new().with_client(client.clone());
                    let engine_config = with_timeout(engine.config(), settings.engine_timeout_s);
                    search.add_engine(engine.with_config(engine_config));
                }
                "duckduckgo" | "ddg" => {
                    let engine = DuckDuckGo::new().with_client(client.clone());
                    let engine_config = with_timeout(engine.config(), settings.engine_timeout_s);
                    search.add_engine(engine.with_config(engine_config));
                }
                other => {
                    return Err(SearchError::Config(format!("unknown search engine: {other}")));
                }
            }
        }

        if settings.site_backends {
            search.add_engine(Wikipedia::new().with_client(client.clone()));
            search.add_engine(StackExchange::new().with_client(client.clone()));
        }

        if let Some((base_url, api_key)) = config.llm.credentials() {
            let summarizer = OpenAiSummarizer::new(base_url, api_key)
                .with_model(config.llm.model.as_str())
                .with_timeout(config.llm.timeout())
                .with_client(client);
            info!(model = %config.llm.model, "AI summary enabled");
            search.set_summarizer(summarizer);
        }

        Ok(search)
    }

    /// Adds a backend. Backends with [`EngineConfig::sites`](crate::EngineConfig)
    /// set only serve matching `site:` queries; the rest form the generic
    /// chain in the order they are added.
    pub fn add_engine<E: Engine + 'static>(&mut self, engine: E) {
        if engine.config().sites.is_empty() {
            self.engines.push(Arc::new(engine));
        } else {
            self.site_engines.push(Arc::new(engine));
        }
    }

    pub fn set_summarizer<S: Summarizer + 'static>(&mut self, summarizer: S) {
        self.summarizer = Some(Arc::new(summarizer));
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = policy;
    }

    /// Sets the maximum number of organic results returned.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    /// Sets how many results one registrable domain may contribute (0 disables).
    pub fn set_max_per_domain(&mut self, cap: usize) {
        self.max_per_domain = cap;
    }

    /// Bounds the whole backend chain, retries and backoff included.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_summary_timeout(&mut self, timeout: Duration) {
        self.summary_timeout = timeout;
    }

    /// Returns the number of configured backends, site backends included.
    pub fn engine_count(&self) -> usize {
        self.engines.len() + self.site_engines.len()
    }

    pub fn has_summarizer(&self) -> bool {
        self.summarizer.is_some()
    }

    /// Runs a search.
    ///
    /// Fails only when the query is unusable, no backend is configured, or
    /// every backend failed and no summary was produced. A backend chain that
    /// ran but matched nothing yields an empty, successful response.
    pub async fn search(&self, query: SearchQuery) -> Outcome<SearchResponse> {
        let start = Instant::now();
        let mut diagnostics = Diagnostics::new();

        if self.engines.iter().chain(&self.site_engines).all(|e| !e.is_enabled()) {
            return Err(Failure::new(SearchError::NoEngines, diagnostics));
        }
        if query.is_empty() {
            return Err(Failure::new(
                SearchError::InvalidQuery("Query cannot be empty".into()),
                diagnostics,
            ));
        }

        if let Some(site) = query.site() {
            diagnostics.flag(Flag::SiteQuery {
                site: site.to_string(),
            });
        }

        let wanted = query.max_results().unwrap_or(self.limit);
        let query = query.with_max_results(wanted.saturating_mul(2).max(20));
        debug!(query = query.raw(), "searching");

        let (organic, summary) = tokio::join!(self.run_chain_bounded(&query), self.run_summary(&query));
        let (organic, organic_diagnostics) = organic;
        let (summary, summary_diagnostics) = summary;
        diagnostics.absorb(organic_diagnostics);
        diagnostics.absorb(summary_diagnostics);

        let aggregator = self.aggregator_for(&query, wanted);
        let results = match organic {
            Ok(results) => aggregator.merge(vec![results]),
            Err(e) if summary.is_some() => {
                warn!(error = %e, "organic search failed, returning summary only");
                Vec::new()
            }
            Err(e) => return Err(Failure::new(e, diagnostics)),
        };

        let summary = summary.map(|s| AiSummary {
            text: s.text,
            citations: aggregator.merge(vec![s.citations]),
        });

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(results = results.len(), duration_ms, "search finished");
        Ok(SearchResponse::new(results, summary, diagnostics, duration_ms))
    }

    fn aggregator_for(&self, query: &SearchQuery, limit: usize) -> Aggregator {
        // Site-restricted queries are one domain by construction.
        let cap = if query.is_site_query() {
            0
        } else {
            self.max_per_domain
        };
        Aggregator::new().with_max_per_domain(cap).with_limit(limit)
    }

    /// The backends to try for `query`, in order.
    fn chain_for(&self, query: &SearchQuery) -> Vec<(Stage, Arc<dyn Engine>)> {
        let site_backends = query.site_host().into_iter().flat_map(|host| {
            self.site_engines
                .iter()
                .filter(move |e| e.is_enabled() && e.serves_site(host))
                .map(|e| (Stage::SiteBackend, Arc::clone(e)))
        });
        let generic = self
            .engines
            .iter()
            .filter(|e| e.is_enabled())
            .map(|e| (Stage::Backend, Arc::clone(e)));
        site_backends.chain(generic).collect()
    }

    async fn run_chain_bounded(&self, query: &SearchQuery) -> (Result<Vec<SearchResult>>, Diagnostics) {
        match tokio::time::timeout(self.timeout, self.run_chain(query)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let after_ms = self.timeout.as_millis() as u64;
                warn!(timeout_ms = after_ms, "search backends timed out");
                let mut diagnostics = Diagnostics::new();
                diagnostics.record(Attempt::new(
                    Stage::Backend,
                    "search",
                    AttemptOutcome::Timeout { after_ms },
                ));
                diagnostics.flag(Flag::AllBackendsFailed);
                (Err(SearchError::Timeout), diagnostics)
            }
        }
    }

    async fn run_chain(&self, query: &SearchQuery) -> (Result<Vec<SearchResult>>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let mut previous: Option<String> = None;
        let mut any_answered = false;

        for (stage, engine) in self.chain_for(query) {
            let name = engine.shortcut().to_string();
            let outcome = retry_call(
                &self.retry,
                stage,
                &name,
                engine.timeout(),
                &mut diagnostics,
                Vec::len,
                |_| engine.search(query),
            )
            .await;

            match outcome {
                Ok(results) if !results.is_empty() => {
                    if let Some(from) = previous {
                        info!(from = %from, to = %name, "fell back to next engine");
                        diagnostics.flag(Flag::EngineFallback { from, to: name });
                    }
                    return (Ok(results), diagnostics);
                }
                Ok(_) => {
                    debug!(engine = %name, "no results, trying next engine");
                    any_answered = true;
                }
                Err(e) => {
                    warn!(engine = %name, error = %e, "engine failed");
                }
            }
            previous = Some(name);
        }

        if any_answered {
            return (Ok(Vec::new()), diagnostics);
        }

        diagnostics.flag(Flag::AllBackendsFailed);
        let attempts = diagnostics.attempts().len();
        warn!(attempts, "all search backends exhausted");
        (Err(SearchError::AllBackendsExhausted { attempts }), diagnostics)
    }

    async fn run_summary(&self, query: &SearchQuery) -> (Option<AiSummary>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let Some(summarizer) = self.summarizer.as_ref() else {
            return (None, diagnostics);
        };

        let name = summarizer.name().to_string();
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.summary_timeout, summarizer.summarize(query.raw())).await;
        let elapsed = started.elapsed();

        let summary = match outcome {
            Ok(Ok(draft)) => {
                let summary = draft.into_summary();
                diagnostics.record(
                    Attempt::new(
                        Stage::Summary,
                        &name,
                        AttemptOutcome::Success {
                            count: summary.citations.len(),
                        },
                    )
                    .with_elapsed(elapsed),
                );
                Some(summary)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "AI summary unavailable");
                diagnostics.record(
                    Attempt::new(
                        Stage::Summary,
                        &name,
                        AttemptOutcome::Error {
                            message: e.to_string(),
                            class: e.class(),
                        },
                    )
                    .with_elapsed(elapsed),
                );
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.summary_timeout.as_millis() as u64, "AI summary timed out");
                diagnostics.record(
                    Attempt::new(
                        Stage::Summary,
                        &name,
                        AttemptOutcome::Timeout {
                            after_ms: self.summary_timeout.as_millis() as u64,
                        },
                    )
                    .with_elapsed(elapsed),
                );
                None
            }
        };

        if summary.is_none() {
            diagnostics.flag(Flag::SummaryUnavailable);
        }
        (summary, diagnostics)
    }
}

impl Default for Search {
    fn default() -> Self {
        Self::new()
    }
}

fn with_timeout(config: &EngineConfig, timeout_s: u64) -> EngineConfig {
    EngineConfig {
        timeout: timeout_s,
        ..config.clone()
    }
}
