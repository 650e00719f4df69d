//! Search backend implementations.

use scraper::{ElementRef, Selector};

use crate::{Result, SearchError};

// Generic engines, tried in priority order
mod brave;
mod duckduckgo;

// Per-site API backends
mod stackexchange;
mod wikipedia;

pub use brave::Brave;
pub use duckduckgo::DuckDuckGo;
pub use stackexchange::StackExchange;
pub use wikipedia::Wikipedia;

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| SearchError::Parse(format!("Failed to parse selector {css}: {e:?}")))
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes inline markup from API snippets (`<span class="searchmatch">`).
pub(crate) fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
