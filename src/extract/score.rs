//! Quality scoring of extraction candidates.

use std::collections::HashSet;

use super::noise::{detect_language, NoiseRules};

/// Measurements of one candidate's content.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityMetrics {
    /// Overall score, 0 to 100.
    pub score: u32,
    pub chars: usize,
    pub lines: usize,
    pub unique_ratio: f64,
    pub noise_ratio: f64,
}

/// Scores cleaned candidate content.
pub trait QualityScorer: Send + Sync {
    fn score(&self, content: &str, noise: &NoiseRules) -> QualityMetrics;
}

/// Weights of [`WeightedScorer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Points for length, reached at `length_target_chars`.
    pub length_max: f64,
    pub length_target_chars: f64,
    /// Points for a fully unique line set.
    pub unique_max: f64,
    pub noise_factor: f64,
    pub noise_max: f64,
    /// Lines of at most this many chars count as short.
    pub short_line_chars: usize,
    /// Short-line penalty applies from this many lines.
    pub short_line_min_lines: usize,
    pub short_ratio_threshold: f64,
    pub short_penalty_max: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            length_max: 60.0,
            length_target_chars: 2000.0,
            unique_max: 20.0,
            noise_factor: 70.0,
            noise_max: 50.0,
            short_line_chars: 12,
            short_line_min_lines: 40,
            short_ratio_threshold: 0.6,
            short_penalty_max: 30.0,
        }
    }
}

/// Length, uniqueness and structure minus noise and fragmentation.
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    weights: ScoreWeights,
}

impl WeightedScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl QualityScorer for WeightedScorer {
    fn score(&self, content: &str, noise: &NoiseRules) -> QualityMetrics {
        let w = &self.weights;
        let content = content.trim();
        let chars = content.chars().count();
        if chars == 0 {
            return QualityMetrics::default();
        }

        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let language = detect_language(content);

        let prose: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| !l.starts_with("```"))
            .collect();
        let unique_ratio = if prose.is_empty() {
            0.0
        } else {
            prose.iter().collect::<HashSet<_>>().len() as f64 / prose.len() as f64
        };
        let noise_ratio = if lines.is_empty() {
            0.0
        } else {
            lines.iter().filter(|l| noise.is_noise(l, language)).count() as f64
                / lines.len() as f64
        };

        let length = (chars as f64 / w.length_target_chars * w.length_max).min(w.length_max);
        let unique = (unique_ratio * w.unique_max).min(w.unique_max);
        let noise_penalty = (noise_ratio * w.noise_factor).min(w.noise_max);

        let short_penalty = if lines.len() >= w.short_line_min_lines {
            let short = lines
                .iter()
                .filter(|l| l.chars().count() <= w.short_line_chars)
                .count() as f64
                / lines.len() as f64;
            if short >= w.short_ratio_threshold {
                ((short - w.short_ratio_threshold) * 100.0).min(w.short_penalty_max)
            } else {
                0.0
            }
        } else {
            0.0
        };

        let total = length + unique - noise_penalty - short_penalty + structure_bonus(content, &lines);
        QualityMetrics {
            score: total.clamp(0.0, 100.0).round() as u32,
            chars,
            lines: lines.len(),
            unique_ratio,
            noise_ratio,
        }
    }
}

/// Bonus for markdown structure: code fences, paragraphs, headings, lists.
fn structure_bonus(content: &str, lines: &[&str]) -> f64 {
    let fences = lines.iter().filter(|l| l.starts_with("```")).count();
    let headings = lines.iter().filter(|l| l.starts_with('#')).count();
    let bullets = lines
        .iter()
        .filter(|l| l.starts_with("- ") || l.starts_with("* ") || l.starts_with("+ "))
        .count();
    if fences == 0 && headings == 0 && bullets == 0 {
        return 0.0;
    }

    let fence_bonus = match fences {
        0 => 0.0,
        1 => 3.0,
        _ => 6.0,
    };
    let paragraphs = content.matches("\n\n").count() as f64;
    fence_bonus
        + paragraphs.min(6.0)
        + (lines.len() as f64 / 8.0 * 4.0).min(4.0)
        + (headings as f64).min(2.0)
        + (bullets as f64 / 3.0 * 2.0).min(2.0)
}
