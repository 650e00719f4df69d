//! Anti-bot challenge and block-page detection.
//!
//! A page counts as blocked when its markup, headers, or visible text look
//! like an interstitial (Cloudflare "Just a moment"), a captcha, a login
//! wall, or a bare refusal. A blocked page is never handed to extraction.

use scraper::{Html, Selector};
use serde::Serialize;

use crate::fetcher::FetchedPage;

/// Visible text shorter than this on a 403/429/503 counts as a block page.
const SHORT_BODY_CHARS: usize = 512;

/// Markers of an interstitial challenge, matched against lowercased HTML.
const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "checking your browser",
    "attention required",
    "cf-browser-verification",
    "cf-challenge",
    "challenge-platform",
];

const CAPTCHA_HINTS: &[&str] = &[
    "captcha",
    "robot check",
    "access denied",
    "verify you are human",
    "unusual traffic",
    "访问异常",
    "安全验证",
    "滑动验证",
    "验证码",
    "请完成验证",
    "检测到异常",
    "系统检测到",
    "访问过于频繁",
    "请稍后再试",
];

const LOGIN_HINTS: &[&str] = &[
    "请先登录",
    "登录后查看更多",
    "请登录后继续访问",
    "马上登录",
    "立即登录",
    "登录即可",
    "sign in to continue",
    "log in to continue",
    "please log in",
];

/// Tags whose text is not visible content.
const HIDDEN_TAGS: &[&str] = &[
    "script", "style", "noscript", "header", "footer", "nav", "aside", "form", "button", "svg",
];

/// Why a page was judged blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    ChallengeMarkup,
    AntiBotHeader,
    CaptchaMarkup,
    LoginWall,
    ShortBlockedBody,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::ChallengeMarkup => "challenge_markup",
            BlockReason::AntiBotHeader => "anti_bot_header",
            BlockReason::CaptchaMarkup => "captcha_markup",
            BlockReason::LoginWall => "login_wall",
            BlockReason::ShortBlockedBody => "short_blocked_body",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of inspecting one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeVerdict {
    pub reason: Option<BlockReason>,
}

impl ChallengeVerdict {
    pub fn clear() -> Self {
        Self { reason: None }
    }

    pub fn blocked(reason: BlockReason) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.reason.is_some()
    }
}

/// Classifies responses as real content or block pages.
#[derive(Debug, Clone, Default)]
pub struct ChallengeDetector {
    /// Extra lowercased markers treated as captcha hints.
    extra_markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker(mut self, marker: impl AsRef<str>) -> Self {
        self.extra_markers.push(marker.as_ref().to_lowercase());
        self
    }

    /// Inspects status, headers, and body of a response.
    pub fn inspect(&self, page: &FetchedPage) -> ChallengeVerdict {
        if has_anti_bot_header(page) {
            return ChallengeVerdict::blocked(BlockReason::AntiBotHeader);
        }

        let lowered = page.body.to_lowercase();
        if is_challenge_markup(&lowered) {
            return ChallengeVerdict::blocked(BlockReason::ChallengeMarkup);
        }

        let visible = visible_text(&page.body);
        let visible_lower = visible.to_lowercase();
        let visible_chars = visible.chars().count();

        // Hints in long pages are usually part of the article itself.
        let short_page = visible_chars < SHORT_BODY_CHARS * 4;
        if short_page {
            let captcha = CAPTCHA_HINTS.iter().any(|h| visible_lower.contains(h))
                || self
                    .extra_markers
                    .iter()
                    .any(|m| visible_lower.contains(m.as_str()));
            if captcha {
                return ChallengeVerdict::blocked(BlockReason::CaptchaMarkup);
            }
            if LOGIN_HINTS.iter().any(|h| visible_lower.contains(h)) {
                return ChallengeVerdict::blocked(BlockReason::LoginWall);
            }
        }

        if matches!(page.status, 403 | 429 | 503) && visible_chars < SHORT_BODY_CHARS {
            return ChallengeVerdict::blocked(BlockReason::ShortBlockedBody);
        }

        ChallengeVerdict::clear()
    }

    /// Inspects rendered HTML without status or headers.
    pub fn inspect_html(&self, html: &str) -> ChallengeVerdict {
        self.inspect(&FetchedPage::new("", 200, html))
    }
}

fn has_anti_bot_header(page: &FetchedPage) -> bool {
    if page
        .header("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
    {
        return true;
    }
    if page.header("x-datadome").is_some() || page.header("x-amzn-waf-action").is_some() {
        return true;
    }
    matches!(page.status, 403 | 503)
        && page
            .header("server")
            .is_some_and(|v| v.to_ascii_lowercase().contains("cloudflare"))
        && page.body.to_lowercase().contains("ray id")
}

fn is_challenge_markup(lowered: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| lowered.contains(m))
        || (lowered.contains("cloudflare") && lowered.contains("ray id"))
}

/// Whether a page title looks like a challenge interstitial. Used while
/// polling a rendered page for the challenge to clear.
pub fn looks_like_challenge_title(title: &str) -> bool {
    let title = title.to_lowercase();
    title.contains("just a moment")
        || title.contains("attention required")
        || title.contains("checking your browser")
        || title.contains("请稍候")
        || title.contains("安全验证")
}

/// Text a reader would see: body text without scripts, chrome, and forms.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };
    let Some(root) = doc.select(&body).next() else {
        return String::new();
    };

    let mut words = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}
