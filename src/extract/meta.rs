//! Page title and description from `<head>` metadata.

use scraper::Html;

use super::OutputFormat;
use crate::engines::{element_text, selector};

/// Title and description of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl PageMeta {
    /// Reads Open Graph and Twitter card tags first, then `<title>` and
    /// `<meta name="description">`.
    pub fn from_document(doc: &Html) -> Self {
        let title = meta_content(doc, "meta[property=\"og:title\"]")
            .or_else(|| meta_content(doc, "meta[name=\"twitter:title\"]"))
            .or_else(|| {
                let sel = selector("title").ok()?;
                let text = element_text(doc.select(&sel).next()?);
                (!text.is_empty()).then_some(text)
            });
        let description = meta_content(doc, "meta[property=\"og:description\"]")
            .or_else(|| meta_content(doc, "meta[name=\"twitter:description\"]"))
            .or_else(|| meta_content(doc, "meta[name=\"description\"]"));
        Self { title, description }
    }

    pub fn from_html(html: &str) -> Self {
        Self::from_document(&Html::parse_document(html))
    }

    /// Title and description alone, used when no extraction candidate
    /// qualifies. `None` when both are missing.
    pub fn degraded_content(&self, format: OutputFormat) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(match format {
                OutputFormat::Markdown => format!("# {title}"),
                OutputFormat::Text => title.clone(),
            });
        }
        if let Some(description) = &self.description {
            parts.push(description.clone());
        }
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|c| !c.is_empty())
}
