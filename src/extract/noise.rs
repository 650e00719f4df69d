//! Noise rules: patterns for boilerplate lines (navigation, share bars,
//! login prompts) filtered out of extracted content.
//!
//! Rules are grouped by content language. The built-in English set always
//! applies; the Chinese set is added when the content is mostly CJK. Extra
//! rules can be loaded from `noise_en.txt` / `noise_zh.txt`, one per line:
//! `re:<regex>` for a case-insensitive full-line regex, `sub:<text>` (or a
//! bare line) for a substring matched against short lines, `#` for comments.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::{Result, SearchError};

/// Lines longer than this (after compaction) are never substring-matched.
const SUBSTRING_MAX_CHARS: usize = 40;

/// Share of CJK characters above which content counts as Chinese.
const CJK_RATIO: f64 = 0.2;

const BUILTIN_EN_REGEX: &[&str] = &[
    r"^\s*(skip to (main )?content|back to top|reload|dismiss alert)\s*$",
    r"^\s*(repository files navigation|view all files)\s*$",
    r"^\s*(sign in|sign up|log in|log out|subscribe|share|tweet|print|menu|search)\s*$",
    r"^\s*(previous|next)( (post|article|page))?\s*$",
    r"^\s*(accept( all)?( cookies)?|cookie settings|manage cookies)\s*$",
    r"^\s*\d+\s*(comments?|likes?|shares?|views?)\s*$",
];

const BUILTIN_EN_SUB: &[&str] = &[
    "captcha",
    "robot check",
    "enable javascript",
    "all rights reserved",
    "we use cookies",
    "sign up for our newsletter",
];

const BUILTIN_ZH_REGEX: &[&str] = &[
    r"^\s*(登录|注册|请先登录|立即登录)\s*$",
    r"^\s*(点赞|收藏|分享|评论|关注|举报)\s*$",
    r"^\s*(上一篇|下一篇|返回顶部|相关推荐)\s*[:：]?.*$",
];

const BUILTIN_ZH_SUB: &[&str] = &[
    "打开app",
    "下载app",
    "访问异常",
    "安全验证",
    "扫码登录",
    "版权所有",
    "未经允许不得转载",
];

static COMPACT_STRIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\s\u{200b}\u{200c}\u{200d}\u{feff}]+|[^\w]+").expect("compact regex is valid")
});

/// Content language, as far as noise filtering cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

/// Classifies text by its share of CJK characters among letters.
pub fn detect_language(text: &str) -> Language {
    let mut letters = 0usize;
    let mut cjk = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
            letters += 1;
        } else if c.is_alphabetic() {
            letters += 1;
        }
    }
    if letters > 0 && cjk as f64 / letters as f64 >= CJK_RATIO {
        Language::Chinese
    } else {
        Language::English
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{3040}'..='\u{30ff}')
}

/// One language's rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    regexes: Vec<Regex>,
    substrings: Vec<String>,
}

impl RuleSet {
    fn builtin(regexes: &[&str], substrings: &[&str]) -> Self {
        let mut set = RuleSet::default();
        for pattern in regexes {
            set.add_regex(pattern);
        }
        for needle in substrings {
            set.add_substring(needle);
        }
        set
    }

    /// Parses the line-oriented rule format. Invalid regexes are skipped
    /// with a warning.
    pub fn parse(source: &str) -> Self {
        let mut set = RuleSet::default();
        set.extend_from(source);
        set
    }

    fn extend_from(&mut self, source: &str) {
        for raw in source.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(pattern) = line.strip_prefix("re:") {
                self.add_regex(pattern.trim());
            } else if let Some(needle) = line.strip_prefix("sub:") {
                self.add_substring(needle.trim());
            } else {
                self.add_substring(line);
            }
        }
    }

    fn add_regex(&mut self, pattern: &str) {
        if pattern.is_empty() {
            return;
        }
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => self.regexes.push(re),
            Err(e) => warn!(pattern, error = %e, "invalid noise regex skipped"),
        }
    }

    fn add_substring(&mut self, needle: &str) {
        let needle = compact(needle);
        if !needle.is_empty() {
            self.substrings.push(needle);
        }
    }

    pub fn len(&self) -> usize {
        self.regexes.len() + self.substrings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(&self, stripped: &str, compacted: &str) -> bool {
        if self.regexes.iter().any(|re| re.is_match(stripped)) {
            return true;
        }
        compacted.chars().count() <= SUBSTRING_MAX_CHARS
            && self.substrings.iter().any(|n| compacted.contains(n.as_str()))
    }
}

/// Lowercases and removes whitespace, zero-width characters, and
/// punctuation.
fn compact(text: &str) -> String {
    COMPACT_STRIP.replace_all(&text.to_lowercase(), "").into_owned()
}

/// The English and Chinese rule sets used by extraction and scoring.
#[derive(Debug, Clone)]
pub struct NoiseRules {
    english: RuleSet,
    chinese: RuleSet,
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self {
            english: RuleSet::builtin(BUILTIN_EN_REGEX, BUILTIN_EN_SUB),
            chinese: RuleSet::builtin(BUILTIN_ZH_REGEX, BUILTIN_ZH_SUB),
        }
    }
}

impl NoiseRules {
    /// Built-in rules only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rules plus `noise_en.txt` and `noise_zh.txt` from `dir`.
    /// Missing files are ignored.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut rules = Self::default();
        for (file, set) in [
            ("noise_en.txt", &mut rules.english),
            ("noise_zh.txt", &mut rules.chinese),
        ] {
            let path = dir.join(file);
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    let before = set.len();
                    set.extend_from(&source);
                    debug!(path = %path.display(), added = set.len() - before, "loaded noise rules");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(SearchError::Config(format!(
                        "cannot read noise rules {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(rules)
    }

    /// Adds rules for `language` in the rule-file format.
    pub fn with_rules(mut self, language: Language, source: &str) -> Self {
        match language {
            Language::English => self.english.extend_from(source),
            Language::Chinese => self.chinese.extend_from(source),
        }
        self
    }

    /// Whether `line` is boilerplate for content in `language`.
    pub fn is_noise(&self, line: &str, language: Language) -> bool {
        let stripped = line.trim();
        if stripped.is_empty() {
            return false;
        }
        let compacted = compact(stripped);
        self.english.matches(stripped, &compacted)
            || (language == Language::Chinese && self.chinese.matches(stripped, &compacted))
    }

    /// Drops noise lines from plain text and collapses blank runs.
    pub fn clean_text(&self, text: &str) -> String {
        let language = detect_language(text);
        let mut lines: Vec<&str> = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                if lines.last().is_some_and(|l| !l.is_empty()) {
                    lines.push("");
                }
                continue;
            }
            if self.is_noise(line, language) {
                continue;
            }
            lines.push(line);
        }
        collapse_blank_runs(&lines)
    }

    /// Drops noise lines from markdown, leaving fenced code untouched.
    pub fn clean_markdown(&self, markdown: &str) -> String {
        let language = detect_language(markdown);
        let mut lines: Vec<String> = Vec::new();
        let mut in_code = false;

        for raw in markdown.lines() {
            let line = raw.trim_end();
            let stripped = line.trim();
            if stripped.starts_with("```") {
                in_code = !in_code;
                lines.push(line.to_string());
                continue;
            }
            if in_code {
                lines.push(line.to_string());
                continue;
            }
            if stripped.is_empty() {
                lines.push(String::new());
                continue;
            }

            let (line, candidate) = if stripped.starts_with('#') {
                let heading = line.trim_end_matches('#').trim_end();
                let text = heading.trim().trim_start_matches('#').trim();
                (heading.to_string(), text.to_string())
            } else {
                (line.to_string(), stripped.to_string())
            };
            if self.is_noise(&candidate, language) {
                continue;
            }
            lines.push(line);
        }

        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        collapse_blank_runs(&refs)
    }
}

fn collapse_blank_runs(lines: &[&str]) -> String {
    let mut out = String::new();
    let mut blanks = 0;
    for line in lines {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
