//! Per-request diagnostics.
//!
//! Every search and fetch response carries a [`Diagnostics`] record listing
//! what was attempted, in order, and how each attempt ended. The record is
//! observational only: recording never fails, and callers outside the crate
//! can read it but not change it.

use std::time::Duration;

use serde::Serialize;

use crate::error::FailureClass;

/// The pipeline stage an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// A generic search engine in the fallback chain.
    Backend,
    /// A per-site API backend selected by a `site:` constraint.
    SiteBackend,
    /// The AI summarization path.
    Summary,
    /// A site API used instead of HTML retrieval (e.g. Discourse JSON).
    SiteApi,
    /// Direct HTTP retrieval of the fetch target.
    DirectFetch,
    /// A host-specific extraction adapter.
    SiteAdapter,
    /// A generic extraction strategy.
    Strategy,
    /// The headless-browser rendering fallback.
    Browser,
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt succeeded and produced `count` items.
    Success { count: usize },
    /// An extraction candidate was produced and scored.
    Candidate {
        score: u32,
        chars: usize,
        accepted: bool,
    },
    /// The attempt did not apply or produced nothing.
    Skipped { reason: String },
    /// The attempt failed.
    Error { message: String, class: FailureClass },
    /// The attempt ran out of time.
    Timeout { after_ms: u64 },
}

impl AttemptOutcome {
    /// Returns true for `Success` and accepted candidates.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Success { .. } | AttemptOutcome::Candidate { accepted: true, .. }
        )
    }
}

/// One recorded attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attempt {
    pub stage: Stage,
    /// Backend, strategy, or adapter identifier.
    pub name: String,
    /// 1-based attempt number against the same component.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

impl Attempt {
    pub fn new(stage: Stage, name: impl Into<String>, outcome: AttemptOutcome) -> Self {
        Self {
            stage,
            name: name.into(),
            attempt: 1,
            outcome,
            elapsed_ms: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }
}

/// Notable decisions taken while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum Flag {
    /// The query carried a `site:` constraint.
    SiteQuery { site: String },
    /// A later engine served the request after an earlier one failed.
    EngineFallback { from: String, to: String },
    /// No engine produced a usable response.
    AllBackendsFailed,
    /// The AI summary path was configured but produced nothing.
    SummaryUnavailable,
    /// Direct retrieval went through the forwarding proxy.
    ForwardingProxy,
    /// The challenge detector fired.
    ChallengeDetected { reason: String },
    /// The browser fallback ran.
    BrowserFallback { trigger: String },
    /// The page content was cut to the configured maximum length.
    Truncated,
    /// The browser path returned title/description metadata only.
    Degraded,
}

/// Append-only record of attempts and flags for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    attempts: Vec<Attempt>,
    flags: Vec<Flag>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub(crate) fn flag(&mut self, flag: Flag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    /// Appends everything recorded by a concurrent sub-task.
    pub(crate) fn absorb(&mut self, other: Diagnostics) {
        self.attempts.extend(other.attempts);
        for flag in other.flags {
            self.flag(flag);
        }
    }

    /// All attempts in the order they were made.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// Attempts made against the component with the given name.
    pub fn attempts_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Attempt> + 'a {
        self.attempts.iter().filter(move |a| a.name == name)
    }

    /// Whether a flag matching the predicate was raised.
    pub fn has_flag(&self, predicate: impl Fn(&Flag) -> bool) -> bool {
        self.flags.iter().any(predicate)
    }

    /// Whether the browser fallback ran for this request.
    pub fn browser_fallback_used(&self) -> bool {
        self.has_flag(|f| matches!(f, Flag::BrowserFallback { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty() && self.flags.is_empty()
    }
}
