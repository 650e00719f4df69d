//! Extraction modes and their thresholds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SearchError;

/// Trade-off between extraction quality and work done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Runs every strategy; may stop early on an excellent candidate.
    #[default]
    Quality,
    Balanced,
    /// Skips the slower recall and baseline strategies.
    Speed,
}

impl ExtractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMode::Quality => "quality",
            ExtractionMode::Balanced => "balanced",
            ExtractionMode::Speed => "speed",
        }
    }
}

impl fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(ExtractionMode::Quality),
            "balanced" => Ok(ExtractionMode::Balanced),
            "speed" => Ok(ExtractionMode::Speed),
            other => Err(SearchError::Config(format!(
                "unknown extraction mode '{other}' (expected quality, balanced or speed)"
            ))),
        }
    }
}

/// Ranking bonus per strategy family, added to the quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBonus {
    pub adapter: u32,
    pub precision: u32,
    pub recall: u32,
    pub fast: u32,
    pub baseline: u32,
}

/// Thresholds for one [`ExtractionMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub mode: ExtractionMode,
    /// Minimum quality for a site-adapter candidate.
    pub adapter_min_quality: u32,
    /// Minimum quality for any other candidate.
    pub general_min_quality: u32,
    pub bonus: StrategyBonus,
    /// Stop generating candidates once one reaches both thresholds below.
    pub early_stop: bool,
    pub early_stop_quality: u32,
    pub early_stop_chars: usize,
}

impl Tuning {
    pub fn for_mode(mode: ExtractionMode) -> Self {
        match mode {
            ExtractionMode::Quality => Self {
                mode,
                adapter_min_quality: 10,
                general_min_quality: 30,
                bonus: StrategyBonus {
                    adapter: 15,
                    precision: 10,
                    recall: 9,
                    fast: 8,
                    baseline: 6,
                },
                early_stop: true,
                early_stop_quality: 80,
                early_stop_chars: 900,
            },
            ExtractionMode::Balanced => Self {
                mode,
                adapter_min_quality: 8,
                general_min_quality: 25,
                bonus: StrategyBonus {
                    adapter: 13,
                    precision: 9,
                    recall: 8,
                    fast: 8,
                    baseline: 5,
                },
                early_stop: false,
                early_stop_quality: 72,
                early_stop_chars: 700,
            },
            ExtractionMode::Speed => Self {
                mode,
                adapter_min_quality: 6,
                general_min_quality: 18,
                bonus: StrategyBonus {
                    adapter: 10,
                    precision: 8,
                    recall: 7,
                    fast: 9,
                    baseline: 4,
                },
                early_stop: false,
                early_stop_quality: 65,
                early_stop_chars: 600,
            },
        }
    }

    /// Whether the recall and baseline strategies run.
    pub fn runs_slow_strategies(&self) -> bool {
        self.mode != ExtractionMode::Speed
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::for_mode(ExtractionMode::default())
    }
}
