//! Generic extraction strategies and the HTML helpers they share.

use std::fmt::Write as _;

use htmd::options::{CodeBlockStyle, HeadingStyle, LinkStyle, Options};
use htmd::HtmlToMarkdown;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::OutputFormat;

/// Tags never worth converting.
const SCRIPT_TAGS: &[&str] = &["script", "style", "noscript", "template", "iframe", "svg"];

/// Page chrome removed by every generic strategy.
const BOILERPLATE: &[&str] = &[
    "script",
    "style",
    "noscript",
    "template",
    "iframe",
    "svg",
    "nav",
    "header",
    "footer",
    "aside",
    "form",
    "button",
    "[role=navigation]",
    "[role=banner]",
    "[role=contentinfo]",
    "[aria-hidden=true]",
    ".share",
    ".sharing",
    ".social",
    ".comments",
    "#comments",
    ".related",
    ".advertisement",
    ".ads",
    ".cookie-banner",
    ".newsletter",
    ".sidebar",
    ".breadcrumb",
];

/// Containers the readable strategy looks for, most specific first.
const MAIN_CANDIDATES: &[&str] = &[
    "article",
    "main",
    "[role=main]",
    "[itemprop=articleBody]",
    ".post-content",
    ".entry-content",
    ".article-body",
    ".article-content",
    ".markdown-body",
    "#content",
    ".content",
];

/// Class or id words that mark a block as chrome for the density strategy.
const CHROME_WORDS: &[&str] = &[
    "nav", "menu", "footer", "header", "sidebar", "comment", "share", "social", "related",
    "promo", "banner", "cookie", "breadcrumb", "advert",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Text container needs this many chars to be taken as the main content.
const READABLE_MIN_CHARS: usize = 140;

/// Wide enough that html2text never wraps paragraphs.
const TEXT_WIDTH: usize = 10_000;

/// Which ranking bonus a strategy earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Adapter,
    Precision,
    Recall,
    Fast,
    Baseline,
}

/// Generic strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Main article container with chrome pruned.
    Readable,
    /// Densest text block by text-to-link ratio.
    Density,
    /// The whole body minus chrome.
    FullBody,
    /// Plain text of the whole document.
    PlainText,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Readable,
        Strategy::Density,
        Strategy::FullBody,
        Strategy::PlainText,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Readable => "readable",
            Strategy::Density => "density",
            Strategy::FullBody => "full_body",
            Strategy::PlainText => "plain_text",
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Strategy::Readable => Family::Precision,
            Strategy::Density => Family::Recall,
            Strategy::FullBody => Family::Fast,
            Strategy::PlainText => Family::Baseline,
        }
    }

    /// Runs the strategy and converts its output to `format`.
    pub fn run(&self, doc: &Html, html: &str, format: OutputFormat) -> Option<String> {
        let fragment = match self {
            Strategy::Readable => readable(doc)?,
            Strategy::Density => densest_block(doc)?,
            Strategy::FullBody => full_body(doc)?,
            Strategy::PlainText => return html_to_text(html),
        };
        convert(&fragment, format)
    }
}

/// Converts an HTML fragment to the requested format.
pub(crate) fn convert(html: &str, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Markdown => html_to_markdown(html),
        OutputFormat::Text => html_to_text(html),
    }
}

pub(crate) fn html_to_markdown(html: &str) -> Option<String> {
    let converter = HtmlToMarkdown::builder()
        .skip_tags(SCRIPT_TAGS.to_vec())
        .options(Options {
            heading_style: HeadingStyle::Atx,
            code_block_style: CodeBlockStyle::Fenced,
            link_style: LinkStyle::Inlined,
            ..Default::default()
        })
        .build();
    match converter.convert(html) {
        Ok(markdown) => Some(markdown),
        Err(e) => {
            debug!(error = %e, "markdown conversion failed");
            None
        }
    }
}

pub(crate) fn html_to_text(html: &str) -> Option<String> {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(error = %e, "text conversion failed");
            None
        }
    }
}

/// Parses selectors, dropping any that fail to parse.
pub(crate) fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .collect()
}

/// Serializes `element` without the descendants matching `prune`.
pub(crate) fn render_pruned(element: ElementRef<'_>, prune: &[Selector]) -> String {
    let mut out = String::new();
    write_element(element, prune, &mut out);
    out
}

fn write_element(element: ElementRef<'_>, prune: &[Selector], out: &mut String) {
    if prune.iter().any(|sel| sel.matches(&element)) {
        return;
    }
    let name = element.value().name();
    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        let _ = write!(out, " {attr}=\"{}\"", escape(value).replace('"', "&quot;"));
    }
    out.push('>');
    if VOID_TAGS.contains(&name) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape(text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, prune, out);
                }
            }
            _ => {}
        }
    }
    let _ = write!(out, "</{name}>");
}

pub(crate) fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn text_len(element: ElementRef<'_>) -> usize {
    element
        .text()
        .map(|t| t.split_whitespace().map(str::len).sum::<usize>())
        .sum()
}

fn link_text_len(element: ElementRef<'_>) -> usize {
    let Ok(links) = Selector::parse("a") else {
        return 0;
    };
    element.select(&links).map(text_len).sum()
}

fn readable(doc: &Html) -> Option<String> {
    let prune = compile(BOILERPLATE);
    for css in MAIN_CANDIDATES {
        let Ok(sel) = Selector::parse(css) else {
            continue;
        };
        let best = doc.select(&sel).max_by_key(|el| text_len(*el));
        if let Some(element) = best.filter(|el| text_len(*el) >= READABLE_MIN_CHARS) {
            return Some(render_pruned(element, &prune));
        }
    }
    None
}

/// Picks the block with the most non-link text. Articles and `<main>` get a
/// head start; link-heavy blocks are pushed down.
fn densest_block(doc: &Html) -> Option<String> {
    let blocks = Selector::parse("article, main, section, div").ok()?;
    let prune = compile(BOILERPLATE);

    let mut best: Option<(i64, ElementRef<'_>)> = None;
    for element in doc.select(&blocks) {
        if is_chrome(element) {
            continue;
        }
        let text = text_len(element) as i64;
        if text == 0 {
            continue;
        }
        let links = link_text_len(element) as i64;
        let mut score = text - 2 * links;
        match element.value().name() {
            "article" => score += 500,
            "main" => score += 300,
            _ => {}
        }
        if links * 2 > text {
            score -= 500;
        }
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, element));
        }
    }

    best.filter(|(score, _)| *score > 0)
        .map(|(_, element)| render_pruned(element, &prune))
}

fn is_chrome(element: ElementRef<'_>) -> bool {
    let value = element.value();
    let marker = format!(
        "{} {}",
        value.attr("class").unwrap_or_default(),
        value.id().unwrap_or_default()
    )
    .to_ascii_lowercase();
    CHROME_WORDS.iter().any(|w| marker.contains(w))
}

fn full_body(doc: &Html) -> Option<String> {
    let body = Selector::parse("body").ok()?;
    let prune = compile(BOILERPLATE);
    doc.select(&body)
        .next()
        .map(|element| render_pruned(element, &prune))
}
