//! Content extraction: turns fetched HTML into clean markdown or text.
//!
//! Several strategies each produce a candidate; candidates are cleaned,
//! deduplicated, scored, and ranked, and the first one that clears the mode's
//! quality threshold wins. Host-specific [`sites`] adapters run first and
//! have a lower threshold.

pub mod meta;
pub mod noise;
mod pipeline;
pub mod score;
pub mod sites;
pub mod strategy;
pub mod tuning;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SearchError;

pub use meta::PageMeta;
pub use noise::{Language, NoiseRules};
pub use pipeline::{
    Candidate, ExtractedPage, Extractor, DEFAULT_MARKDOWN_MIN_CHARS, DEFAULT_TEXT_MIN_CHARS,
};
pub use score::{QualityMetrics, QualityScorer, ScoreWeights, WeightedScorer};
pub use tuning::{ExtractionMode, Tuning};

/// Output format of extracted content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Text,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Text => "text",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "text" | "txt" => Ok(OutputFormat::Text),
            other => Err(SearchError::Config(format!("unknown output format '{other}'"))),
        }
    }
}
