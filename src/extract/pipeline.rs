use std::collections::HashSet;
use std::sync::Arc;

use scraper::Html;
use serde::Serialize;
use tracing::{debug, info};

use super::meta::PageMeta;
use super::noise::NoiseRules;
use super::score::{QualityMetrics, QualityScorer, WeightedScorer};
use super::sites::adapters_for;
use super::strategy::{convert, Family, Strategy};
use super::tuning::{ExtractionMode, Tuning};
use super::OutputFormat;
use crate::diagnostics::{Attempt, AttemptOutcome, Diagnostics, Stage};
use crate::{Result, SearchError};

/// Minimum characters for markdown output.
pub const DEFAULT_MARKDOWN_MIN_CHARS: usize = 120;
/// Minimum characters for text output.
pub const DEFAULT_TEXT_MIN_CHARS: usize = 200;

/// The selected content of a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedPage {
    /// Final URL the content came from.
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub format: OutputFormat,
    /// Winning strategy or adapter, e.g. `readable` or `adapter:github`.
    pub strategy: String,
    pub quality: u32,
    pub chars: usize,
    /// Content was cut to the configured maximum length.
    pub truncated: bool,
    /// Content is title and description only.
    pub degraded: bool,
}

impl ExtractedPage {
    /// Cuts the content to at most `max_chars` characters.
    pub fn truncate(&mut self, max_chars: usize) -> bool {
        if self.content.chars().count() <= max_chars {
            return false;
        }
        self.content = self.content.chars().take(max_chars).collect();
        self.chars = max_chars;
        self.truncated = true;
        true
    }
}

/// One scored extraction result.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub strategy: String,
    pub family: Family,
    pub content: String,
    pub metrics: QualityMetrics,
}

/// Runs site adapters and generic strategies and picks the best candidate.
#[derive(Clone)]
pub struct Extractor {
    tuning: Tuning,
    format: OutputFormat,
    noise: Arc<NoiseRules>,
    scorer: Arc<dyn QualityScorer>,
    markdown_min_chars: usize,
    text_min_chars: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractionMode::default())
    }
}

impl Extractor {
    pub fn new(mode: ExtractionMode) -> Self {
        Self {
            tuning: Tuning::for_mode(mode),
            format: OutputFormat::default(),
            noise: Arc::new(NoiseRules::default()),
            scorer: Arc::new(WeightedScorer::default()),
            markdown_min_chars: DEFAULT_MARKDOWN_MIN_CHARS,
            text_min_chars: DEFAULT_TEXT_MIN_CHARS,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_noise_rules(mut self, noise: NoiseRules) -> Self {
        self.noise = Arc::new(noise);
        self
    }

    pub fn with_scorer(mut self, scorer: impl QualityScorer + 'static) -> Self {
        self.scorer = Arc::new(scorer);
        self
    }

    pub fn with_min_chars(mut self, markdown: usize, text: usize) -> Self {
        self.markdown_min_chars = markdown;
        self.text_min_chars = text;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    fn min_chars(&self) -> usize {
        match self.format {
            OutputFormat::Markdown => self.markdown_min_chars,
            OutputFormat::Text => self.text_min_chars,
        }
    }

    fn min_quality(&self, family: Family) -> u32 {
        match family {
            Family::Adapter => self.tuning.adapter_min_quality,
            _ => self.tuning.general_min_quality,
        }
    }

    fn bonus(&self, family: Family) -> u32 {
        let bonus = &self.tuning.bonus;
        match family {
            Family::Adapter => bonus.adapter,
            Family::Precision => bonus.precision,
            Family::Recall => bonus.recall,
            Family::Fast => bonus.fast,
            Family::Baseline => bonus.baseline,
        }
    }

    fn qualifies(&self, family: Family, metrics: &QualityMetrics) -> bool {
        metrics.chars >= self.min_chars() && metrics.score >= self.min_quality(family)
    }

    fn clean(&self, content: &str) -> String {
        match self.format {
            OutputFormat::Markdown => self.noise.clean_markdown(content),
            OutputFormat::Text => self.noise.clean_text(content),
        }
    }

    /// Extracts the best content of `html` fetched from `url`.
    ///
    /// Fails with [`SearchError::InsufficientQuality`] when no candidate
    /// clears its threshold. Every candidate is recorded in `diagnostics`.
    pub fn extract(
        &self,
        html: &str,
        url: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<ExtractedPage> {
        let doc = Html::parse_document(html);
        let meta = PageMeta::from_document(&doc);
        let mut pool = CandidatePool::default();

        for adapter in adapters_for(url) {
            let name = format!("adapter:{}", adapter.name);
            let content = adapter
                .extract(&doc)
                .and_then(|fragment| convert(&fragment, self.format));
            let stop = self.consider(
                &name,
                Family::Adapter,
                Stage::SiteAdapter,
                content,
                &mut pool,
                diagnostics,
            );
            if stop {
                return Ok(self.finish(url, &meta, pool.take_last()));
            }
        }

        for strategy in Strategy::ALL {
            let slow = matches!(strategy.family(), Family::Recall | Family::Baseline);
            if slow && !self.tuning.runs_slow_strategies() {
                continue;
            }
            let content = strategy.run(&doc, html, self.format);
            let stop = self.consider(
                strategy.name(),
                strategy.family(),
                Stage::Strategy,
                content,
                &mut pool,
                diagnostics,
            );
            if stop {
                return Ok(self.finish(url, &meta, pool.take_last()));
            }
        }

        self.select(pool.into_vec())
            .map(|winner| self.finish(url, &meta, winner))
    }

    /// Scores content already rendered by a site API against the adapter
    /// threshold.
    pub fn accept_rendered(
        &self,
        url: &str,
        title: Option<String>,
        name: &str,
        content: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<ExtractedPage> {
        let cleaned = self.clean(content);
        let metrics = self.scorer.score(&cleaned, &self.noise);
        let accepted = self.qualifies(Family::Adapter, &metrics);
        diagnostics.record(Attempt::new(
            Stage::SiteApi,
            name,
            AttemptOutcome::Candidate {
                score: metrics.score,
                chars: metrics.chars,
                accepted,
            },
        ));
        if !accepted {
            return Err(SearchError::InsufficientQuality {
                best_score: metrics.score,
                best_chars: metrics.chars,
            });
        }
        let meta = PageMeta {
            title,
            description: None,
        };
        Ok(self.finish(
            url,
            &meta,
            Candidate {
                strategy: name.to_string(),
                family: Family::Adapter,
                content: cleaned,
                metrics,
            },
        ))
    }

    /// Title-and-description page for when nothing else qualifies.
    pub fn degraded(&self, html: &str, url: &str) -> Option<ExtractedPage> {
        let meta = PageMeta::from_html(html);
        let content = meta.degraded_content(self.format)?;
        let chars = content.chars().count();
        Some(ExtractedPage {
            url: url.to_string(),
            title: meta.title,
            content,
            format: self.format,
            strategy: "degraded".to_string(),
            quality: 0,
            chars,
            truncated: false,
            degraded: true,
        })
    }

    /// Records and pools one candidate. Returns true when it is good enough
    /// to stop early.
    fn consider(
        &self,
        name: &str,
        family: Family,
        stage: Stage,
        content: Option<String>,
        pool: &mut CandidatePool,
        diagnostics: &mut Diagnostics,
    ) -> bool {
        let skip = |diagnostics: &mut Diagnostics, reason: &str| {
            diagnostics.record(Attempt::new(
                stage,
                name,
                AttemptOutcome::Skipped {
                    reason: reason.to_string(),
                },
            ));
        };

        let Some(content) = content else {
            skip(diagnostics, "no content");
            return false;
        };
        let cleaned = self.clean(&content);
        if cleaned.is_empty() {
            skip(diagnostics, "empty after cleaning");
            return false;
        }
        if pool.contains(&cleaned) {
            skip(diagnostics, "duplicate");
            return false;
        }

        let metrics = self.scorer.score(&cleaned, &self.noise);
        let accepted = self.qualifies(family, &metrics);
        debug!(
            strategy = name,
            score = metrics.score,
            chars = metrics.chars,
            accepted,
            "extraction candidate"
        );
        diagnostics.record(Attempt::new(
            stage,
            name,
            AttemptOutcome::Candidate {
                score: metrics.score,
                chars: metrics.chars,
                accepted,
            },
        ));
        pool.push(Candidate {
            strategy: name.to_string(),
            family,
            content: cleaned,
            metrics,
        });

        let tuning = &self.tuning;
        accepted
            && tuning.early_stop
            && metrics.score >= tuning.early_stop_quality
            && metrics.chars >= self.min_chars().max(tuning.early_stop_chars)
    }

    /// Adapters first against their own threshold, then everything ranked
    /// by score plus strategy bonus.
    fn select(&self, candidates: Vec<Candidate>) -> Result<Candidate> {
        let mut ranked = candidates;
        ranked.sort_by(|a, b| self.rank_key(b).cmp(&self.rank_key(a)));

        let best = ranked
            .iter()
            .map(|c| (c.metrics.score, c.metrics.chars))
            .max()
            .unwrap_or((0, 0));

        let adapter = ranked
            .iter()
            .position(|c| c.family == Family::Adapter && self.qualifies(Family::Adapter, &c.metrics));
        let index = adapter.or_else(|| {
            ranked
                .iter()
                .position(|c| self.qualifies(Family::Precision, &c.metrics))
        });

        match index {
            Some(i) => Ok(ranked.swap_remove(i)),
            None => Err(SearchError::InsufficientQuality {
                best_score: best.0,
                best_chars: best.1,
            }),
        }
    }

    fn rank_key(&self, candidate: &Candidate) -> (u32, u32, usize) {
        let score = candidate.metrics.score;
        (
            score + self.bonus(candidate.family),
            score,
            candidate.metrics.chars,
        )
    }

    fn finish(&self, url: &str, meta: &PageMeta, winner: Candidate) -> ExtractedPage {
        info!(url, strategy = %winner.strategy, score = winner.metrics.score, "extraction selected");
        ExtractedPage {
            url: url.to_string(),
            title: meta.title.clone(),
            chars: winner.metrics.chars,
            content: winner.content,
            format: self.format,
            strategy: winner.strategy,
            quality: winner.metrics.score,
            truncated: false,
            degraded: false,
        }
    }
}

/// Candidates in generation order, deduplicated by cleaned content.
#[derive(Default)]
struct CandidatePool {
    seen: HashSet<String>,
    candidates: Vec<Candidate>,
}

impl CandidatePool {
    fn contains(&self, content: &str) -> bool {
        self.seen.contains(content)
    }

    fn push(&mut self, candidate: Candidate) {
        self.seen.insert(candidate.content.clone());
        self.candidates.push(candidate);
    }

    fn take_last(mut self) -> Candidate {
        // only called right after a push
        self.candidates.pop().unwrap_or_else(|| Candidate {
            strategy: String::new(),
            family: Family::Baseline,
            content: String::new(),
            metrics: QualityMetrics::default(),
        })
    }

    fn into_vec(self) -> Vec<Candidate> {
        self.candidates
    }
}
