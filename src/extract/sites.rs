//! Site adapters: extraction rules for sites whose layout the generic
//! strategies handle poorly.
//!
//! Each adapter pairs a URL predicate with a function that returns the
//! pruned HTML of the page's real content. Adding a site means adding a row
//! to [`ADAPTERS`].

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::meta::PageMeta;
use super::strategy::{compile, escape, render_pruned};
use crate::engines::element_text;
use crate::url_normalize::host_matches;

/// A site-specific extraction rule.
pub struct SiteAdapter {
    pub name: &'static str,
    matches: fn(&Url) -> bool,
    extract: fn(&Html) -> Option<String>,
}

impl SiteAdapter {
    pub fn matches(&self, url: &Url) -> bool {
        (self.matches)(url)
    }

    /// Pruned HTML of the page content, or `None` when the expected
    /// structure is missing.
    pub fn extract(&self, doc: &Html) -> Option<String> {
        (self.extract)(doc).filter(|html| !html.trim().is_empty())
    }
}

pub static ADAPTERS: &[SiteAdapter] = &[
    SiteAdapter {
        name: "github",
        matches: is_github,
        extract: github,
    },
    SiteAdapter {
        name: "csdn",
        matches: is_csdn,
        extract: csdn,
    },
    SiteAdapter {
        name: "stackexchange",
        matches: is_stackexchange,
        extract: stackexchange,
    },
    SiteAdapter {
        name: "discourse",
        matches: is_discourse_topic,
        extract: discourse,
    },
    SiteAdapter {
        name: "steamcommunity",
        matches: is_steam,
        extract: steam,
    },
];

/// Adapters whose predicate accepts `url`, in table order.
pub fn adapters_for(url: &str) -> Vec<&'static SiteAdapter> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    ADAPTERS.iter().filter(|a| a.matches(&parsed)).collect()
}

fn host(url: &Url) -> &str {
    url.host_str().unwrap_or_default()
}

fn is_github(url: &Url) -> bool {
    host(url).eq_ignore_ascii_case("github.com")
}

fn is_csdn(url: &Url) -> bool {
    host_matches(host(url), "csdn.net")
}

fn is_steam(url: &Url) -> bool {
    host_matches(host(url), "steamcommunity.com")
}

const STACKEXCHANGE_HOSTS: &[&str] = &[
    "stackoverflow.com",
    "stackexchange.com",
    "superuser.com",
    "serverfault.com",
    "askubuntu.com",
    "mathoverflow.net",
];

fn is_stackexchange(url: &Url) -> bool {
    STACKEXCHANGE_HOSTS.iter().any(|d| host_matches(host(url), d))
        && url.path().starts_with("/questions/")
}

/// Discourse topic pages live under `/t/<slug>/<id>`.
pub fn is_discourse_topic(url: &Url) -> bool {
    url.path().contains("/t/")
}

/// The answer id of `zhihu.com/answer/<id>` and
/// `zhihu.com/question/<q>/answer/<id>` links.
pub fn zhihu_answer_id(url: &Url) -> Option<&str> {
    if !host_matches(url.host_str()?, "zhihu.com") {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let id = match segments.as_slice() {
        ["answer", id, ..] => *id,
        ["question", q, "answer", id, ..] if is_numeric(q) => *id,
        _ => return None,
    };
    is_numeric(id).then_some(id)
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn first<'a>(doc: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|css| {
        let sel = Selector::parse(css).ok()?;
        doc.select(&sel).next()
    })
}

fn heading(title: Option<&str>, description: Option<&str>) -> String {
    let mut html = String::new();
    if let Some(title) = title {
        html.push_str(&format!("<h1>{}</h1>", escape(title)));
    }
    if let Some(description) = description {
        html.push_str(&format!("<p>{}</p>", escape(description)));
    }
    html
}

fn github(doc: &Html) -> Option<String> {
    let readme = first(
        doc,
        &[
            "#readme article.markdown-body",
            "#readme .markdown-body",
            "article.markdown-body",
        ],
    )?;
    let prune = compile(&[
        "svg",
        "button",
        "summary",
        "details",
        "clipboard-copy",
        "a.anchor",
        "a.anchorjs-link",
        ".octicon",
    ]);
    let meta = PageMeta::from_document(doc);
    Some(format!(
        "{}{}",
        heading(meta.title.as_deref(), meta.description.as_deref()),
        render_pruned(readme, &prune)
    ))
}

fn csdn(doc: &Html) -> Option<String> {
    let main = first(doc, &["#content_views", "article"])?;
    let prune = compile(&[
        "script",
        "style",
        "header",
        "footer",
        "nav",
        "aside",
        ".hide-article-box",
        ".recommend-box",
        ".tool-box",
        ".blog-tags-box",
        ".article-info-box",
        ".operating",
        ".csdn-toolbar",
        "#passportbox",
        "#toolBarBox",
    ]);
    let title = first(doc, &["h1.title-article", "h1"]).map(element_text);
    Some(format!(
        "{}{}",
        heading(title.as_deref(), None),
        render_pruned(main, &prune)
    ))
}

fn stackexchange(doc: &Html) -> Option<String> {
    let question = first(doc, &["#question .s-prose", "#question .js-post-body"])?;
    let answers = Selector::parse(".answer .s-prose, .answer .js-post-body").ok()?;
    let prune = compile(&["svg", "button", ".js-post-menu", ".post-signature"]);
    let title = first(doc, &["#question-header h1", "h1"]).map(element_text);

    let mut html = heading(title.as_deref(), None);
    html.push_str(&render_pruned(question, &prune));
    for (i, answer) in doc.select(&answers).enumerate() {
        html.push_str(&format!("<h2>Answer {}</h2>", i + 1));
        html.push_str(&render_pruned(answer, &prune));
    }
    Some(html)
}

fn discourse(doc: &Html) -> Option<String> {
    let root = first(doc, &["#main-outlet", "main", "body"])?;
    let posts = Selector::parse("article[data-post-id], article.topic-post").ok()?;
    let cooked = Selector::parse(".cooked").ok()?;
    let prune = compile(&["svg", "button", ".post-menu-area", ".topic-map", ".names"]);

    let bodies: Vec<String> = root
        .select(&posts)
        .filter_map(|post| post.select(&cooked).next())
        .map(|body| render_pruned(body, &prune))
        .collect();
    if bodies.is_empty() {
        return None;
    }
    let meta = PageMeta::from_document(doc);
    Some(format!(
        "{}{}",
        heading(meta.title.as_deref(), None),
        bodies.join("<hr>")
    ))
}

fn steam(doc: &Html) -> Option<String> {
    let main = first(doc, &["#responsive_page_template_content", "body"])?;
    let prune = compile(&[
        "script",
        "style",
        "#global_header",
        "#global_actions",
        "#footer",
        ".responsive_page_menu_ctn",
        ".responsive_header",
        ".responsive_page_menu",
        ".responsive_local_menu",
        ".pulldown",
    ]);
    Some(render_pruned(main, &prune))
}
