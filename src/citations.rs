//! Parsing of AI summary text: citation links, the `SOURCES:` block, and
//! cleanup of reasoning tags and inline URLs.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::url_normalize::{host_of, normalize_url, unwrap_redirect};
use crate::SearchResult;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think regex is valid"));
static THINK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?think>").expect("think tag regex is valid"));
static NAMESPACED_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<([a-z_]+:[a-z_]+)[^>]*>.*?</[a-z_]+:[a-z_]+>").expect("tag regex is valid")
});
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex is valid"));
static SPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("space regex is valid"));

static MARKDOWN_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\(((?:https?://|//|www\.)[^)\s]+)\)").expect("link regex is valid")
});
static BARE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://|//|www\.)[^\s<>"'\)\]，。、；：）】}]+"#).expect("url regex is valid")
});
static ANGLE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<https?://[^>]+>").expect("angle url regex is valid"));
static JSON_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""url"\s*:\s*"([^"]+)""#).expect("json url regex is valid"));
static BROWSE_PAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)browse_page\s*\{\s*"url"\s*:\s*"((?:[^"\\]|\\.)+)"(?:\s*,\s*"instructions"\s*:\s*"((?:[^"\\]|\\.)*)")?\s*\}"#,
    )
    .expect("browse_page regex is valid")
});
static SOURCES_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*SOURCES\s*[:：]\s*$").expect("sources regex is valid"));
static SOURCES_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:#+\s*)?(?:参考来源|参考资料|参考链接|sources|references)\b.*[:：]?\s*$")
        .expect("heading regex is valid")
});
static EMPTY_BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\)|\[\s*\]").expect("brackets regex is valid"));
static TRAILING_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\)\]\}>,，。、；：.;:!?]+$").expect("junk regex is valid"));

/// Engine identifier given to citations.
pub const CITATION_ENGINE: &str = "ai";

/// Removes reasoning blocks (`<think>...</think>`) and namespaced tool tags
/// from model output.
pub fn clean_ai_tags(text: &str) -> String {
    let text = THINK_BLOCK.replace_all(text, "");
    let text = THINK_TAG.replace_all(&text, "");
    let text = NAMESPACED_TAG.replace_all(&text, "");
    BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
}

/// Extracts cited links in the order they first appear.
///
/// Sources, in order of precedence: markdown links (which keep their anchor
/// text as title), `browse_page {"url": ...}` tool traces, the labeled
/// `SOURCES:` block, then any remaining bare URLs and JSON `"url"` fields.
/// Links are deduplicated by normalized URL; redirect wrappers are unwrapped.
pub fn parse_citations(text: &str) -> Vec<SearchResult> {
    let mut citations = Citations::default();

    for caps in MARKDOWN_LINK.captures_iter(text) {
        citations.push(&caps[2], Some(caps[1].trim()));
    }

    for caps in BROWSE_PAGE.captures_iter(text) {
        let url = unescape(caps[1].trim());
        let title = caps
            .get(2)
            .map(|m| unescape(m.as_str().trim()))
            .filter(|s| !s.is_empty())
            .map(|instruction| {
                let short: String = instruction.chars().take(80).collect();
                format!("browse_page: {}", short.trim())
            });
        citations.push(&url, title.as_deref());
    }

    if let Some(block) = sources_block(text) {
        for m in BARE_URL.find_iter(block) {
            citations.push(m.as_str(), None);
        }
    }

    let without_links = MARKDOWN_LINK.replace_all(text, "");
    for m in BARE_URL.find_iter(&without_links) {
        citations.push(m.as_str(), None);
    }
    for caps in JSON_URL.captures_iter(text) {
        citations.push(&caps[1], None);
    }

    citations.into_results()
}

/// Summary body without links, URLs, or the trailing sources section.
pub fn strip_urls(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = ANGLE_URL.replace_all(&text, "");
    let text = BARE_URL.replace_all(&text, "");
    let text = EMPTY_BRACKETS.replace_all(&text, "");
    let text = SPACE_RUNS.replace_all(&text, " ");

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        if is_sources_heading(line) {
            break;
        }
        let bare = line.trim();
        if bare == "-" || bare == "*" {
            continue;
        }
        lines.push(line);
    }

    BLANK_RUNS
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

fn is_sources_heading(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.ends_with(':') || trimmed.ends_with('：') || trimmed.starts_with('#'))
        && SOURCES_HEADING.is_match(line)
}

/// Text following the last `SOURCES:` label.
fn sources_block(text: &str) -> Option<&str> {
    SOURCES_LABEL
        .find_iter(text)
        .last()
        .map(|m| &text[m.end()..])
}

fn unescape(value: &str) -> String {
    value.replace("\\/", "/").replace("\\\"", "\"")
}

#[derive(Default)]
struct Citations {
    seen: HashSet<String>,
    results: Vec<SearchResult>,
}

impl Citations {
    fn push(&mut self, raw: &str, title: Option<&str>) {
        let Some(url) = clean_candidate(raw) else {
            return;
        };
        let key = normalize_url(&url);
        if !self.seen.insert(key) {
            return;
        }

        let title = match title {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => host_of(&url).unwrap_or_else(|| url.clone()),
        };
        let position = self.results.len() as u32 + 1;
        self.results
            .push(SearchResult::new(url, title, "").with_engine(CITATION_ENGINE, position));
    }

    fn into_results(self) -> Vec<SearchResult> {
        self.results
    }
}

fn clean_candidate(raw: &str) -> Option<String> {
    let url = TRAILING_JUNK.replace(raw.trim(), "").to_string();
    let url = if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else if url.starts_with("www.") {
        format!("https://{url}")
    } else {
        url
    };
    let url = unwrap_redirect(&url).unwrap_or(url);
    (url.starts_with("http") && url.len() > 10 && host_of(&url).is_some()).then_some(url)
}
