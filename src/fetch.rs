//! Page fetch orchestration.
//!
//! A fetch validates the target, tries a site API where one exists (ahead of
//! browser-first hosts), then retrieves the page directly under the retry
//! policy. The response passes
//! the challenge detector before extraction; a challenge, a failed direct
//! fetch, or an extraction below threshold hands the URL to the browser
//! renderer. The rendered HTML is extracted once and never re-enters the
//! fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::challenge::ChallengeDetector;
use crate::config::Config;
use crate::diagnostics::{Attempt, AttemptOutcome, Diagnostics, Flag, Stage};
use crate::extract::sites::{is_discourse_topic, zhihu_answer_id};
use crate::extract::strategy::{convert, escape};
use crate::extract::{ExtractedPage, Extractor, NoiseRules, OutputFormat};
use crate::fetcher::{FetchedPage, PageFetcher, PageRenderer};
use crate::fetcher_http::{build_client, HttpFetcher};
use crate::retry::{retry_call, RetryPolicy};
use crate::url_normalize::{host_matches, normalize_url};
use crate::{Failure, Outcome, Result, SearchError};

/// Quality under which a page that still shows a challenge is replaced by
/// its title and description.
const BLOCKED_MIN_QUALITY: u32 = 65;

const SITE_API_DISCOURSE: &str = "site_api:discourse";
const SITE_API_ZHIHU: &str = "site_api:zhihu";

/// A page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// Extra request headers for direct retrieval.
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Extracted page plus how it was obtained.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResponse {
    pub page: ExtractedPage,
    /// HTTP status of the direct or site API response; `None` when the
    /// content came from the browser.
    pub status: Option<u16>,
    pub via_browser: bool,
    pub via_forwarding: bool,
    pub diagnostics: Diagnostics,
}

struct Retrieved {
    page: ExtractedPage,
    status: Option<u16>,
    via_browser: bool,
}

/// Fetches pages and extracts their main content.
pub struct Fetcher {
    http: Arc<dyn PageFetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
    extractor: Extractor,
    detector: ChallengeDetector,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    render_timeout: Duration,
    challenge_wait: Duration,
    browser_first_hosts: Vec<String>,
    max_content_chars: usize,
    via_forwarding: bool,
    site_api: bool,
}

impl Fetcher {
    pub fn new(http: impl PageFetcher + 'static) -> Self {
        Self {
            http: Arc::new(http),
            renderer: None,
            extractor: Extractor::default(),
            detector: ChallengeDetector::new(),
            retry: RetryPolicy::default(),
            fetch_timeout: Duration::from_secs(15),
            render_timeout: Duration::from_secs(60),
            challenge_wait: Duration::from_secs(20),
            browser_first_hosts: Vec::new(),
            max_content_chars: 40_000,
            via_forwarding: false,
            site_api: true,
        }
    }

    /// Builds the HTTP fetcher, extractor, and (with the `headless`
    /// feature) the Chrome renderer from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fetch = &config.fetch;
        let client = build_client(&config.client_options(fetch.timeout())?)?;
        let mut http = HttpFetcher::with_client(client);
        let forwarding = config.forwarding_endpoint()?;
        let via_forwarding = forwarding.is_some();
        if let Some(endpoint) = forwarding {
            info!(endpoint = endpoint.base(), "direct fetches use the forwarding proxy");
            http = http.with_forwarding(endpoint);
        }

        let noise = match fetch.noise_rules_dir {
            Some(ref dir) => NoiseRules::load_dir(dir)?,
            None => NoiseRules::new(),
        };
        let extractor = Extractor::new(fetch.mode)
            .with_format(fetch.format)
            .with_min_chars(fetch.markdown_min_chars, fetch.text_min_chars)
            .with_noise_rules(noise);

        #[allow(unused_mut)]
        let mut fetcher = Fetcher::new(http)
            .with_extractor(extractor)
            .with_retry_policy(config.search.retry.clone())
            .with_fetch_timeout(fetch.timeout())
            .with_render_timeout(config.browser.render_timeout())
            .with_challenge_wait(config.browser.challenge_wait())
            .with_browser_first_hosts(fetch.browser_first_hosts.clone())
            .with_max_content_chars(fetch.max_content_chars)
            .with_forwarding_flag(via_forwarding);

        #[cfg(feature = "headless")]
        if config.browser.enabled {
            use crate::browser::{BrowserPool, BrowserPoolConfig, ChromeRenderer};

            let pool = BrowserPool::new(BrowserPoolConfig {
                max_tabs: config.browser.max_tabs,
                headless: config.browser.headless,
                chrome_path: config.browser.chrome_path.clone(),
                proxy_url: config.outbound_proxy()?.map(|p| p.url()),
                user_agent: config.browser_user_agent().to_string(),
                launch_args: Vec::new(),
            });
            let renderer = ChromeRenderer::new(Arc::new(pool))
                .with_navigation_timeout(config.browser.render_timeout());
            fetcher = fetcher.with_renderer(renderer);
        }

        Ok(fetcher)
    }

    /// Enables the browser fallback.
    pub fn with_renderer(mut self, renderer: impl PageRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_detector(mut self, detector: ChallengeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn with_challenge_wait(mut self, wait: Duration) -> Self {
        self.challenge_wait = wait;
        self
    }

    /// Hosts (and subdomains) rendered in the browser without a direct
    /// fetch first.
    pub fn with_browser_first_hosts(mut self, hosts: Vec<String>) -> Self {
        self.browser_first_hosts = hosts;
        self
    }

    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max.max(1);
        self
    }

    /// Marks direct fetches as going through the forwarding proxy.
    pub fn with_forwarding_flag(mut self, via_forwarding: bool) -> Self {
        self.via_forwarding = via_forwarding;
        self
    }

    pub fn with_site_api(mut self, enabled: bool) -> Self {
        self.site_api = enabled;
        self
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Fetches and extracts one page.
    pub async fn fetch(&self, request: FetchRequest) -> Outcome<FetchResponse> {
        let started = Instant::now();
        let mut diagnostics = Diagnostics::new();

        let target = match validate_target(&request.url) {
            Ok(target) => target,
            Err(e) => return Err(Failure::new(e, diagnostics)),
        };
        if self.via_forwarding {
            diagnostics.flag(Flag::ForwardingProxy);
        }

        let retrieved = self
            .retrieve(&target, &request.headers, &mut diagnostics)
            .await;
        let mut retrieved = match retrieved {
            Ok(retrieved) => retrieved,
            Err(e) => {
                warn!(url = %target, error = %e, "fetch failed");
                return Err(Failure::new(e, diagnostics));
            }
        };

        if retrieved.page.truncate(self.max_content_chars) {
            diagnostics.flag(Flag::Truncated);
        }
        info!(
            url = %target,
            strategy = %retrieved.page.strategy,
            via_browser = retrieved.via_browser,
            duration_ms = started.elapsed().as_millis() as u64,
            "fetch finished"
        );

        Ok(FetchResponse {
            page: retrieved.page,
            status: retrieved.status,
            via_browser: retrieved.via_browser,
            via_forwarding: self.via_forwarding && !retrieved.via_browser,
            diagnostics,
        })
    }

    async fn retrieve(
        &self,
        target: &Url,
        headers: &[(String, String)],
        diagnostics: &mut Diagnostics,
    ) -> Result<Retrieved> {
        let url = target.as_str();

        if self.site_api {
            if let Some(retrieved) = self.try_zhihu(target, diagnostics).await {
                return Ok(retrieved);
            }
            if let Some(retrieved) = self.try_discourse(target, diagnostics).await {
                return Ok(retrieved);
            }
        }

        if self.renderer.is_some() && self.is_browser_first(target) {
            debug!(url, "browser-first host");
            return self.render(url, "browser_first_host", diagnostics).await;
        }

        let direct = retry_call(
            &self.retry,
            Stage::DirectFetch,
            "http",
            self.fetch_timeout,
            diagnostics,
            |_| 1,
            |_| self.fetch_direct(url, headers),
        )
        .await;

        let page = match direct {
            Ok(page) => page,
            Err(e) if self.renderer.is_some() => {
                warn!(url, error = %e, "direct fetch failed, trying browser");
                return self.render(url, "direct_fetch_failed", diagnostics).await;
            }
            Err(e) => return Err(e),
        };

        if let Some(reason) = self.detector.inspect(&page).reason {
            info!(url, reason = %reason, status = page.status, "challenge detected");
            diagnostics.flag(Flag::ChallengeDetected {
                reason: reason.to_string(),
            });
            if self.renderer.is_none() {
                return Err(SearchError::ChallengeDetected(reason.to_string()));
            }
            return self.render(url, "challenge", diagnostics).await;
        }

        match self.extractor.extract(&page.body, url, diagnostics) {
            Ok(extracted) => Ok(Retrieved {
                page: extracted,
                status: Some(page.status),
                via_browser: false,
            }),
            Err(SearchError::InsufficientQuality {
                best_score,
                best_chars,
            }) if self.renderer.is_some() => {
                debug!(url, best_score, best_chars, "direct content below threshold");
                self.render(url, "insufficient_quality", diagnostics).await
            }
            Err(e) => Err(e),
        }
    }

    /// Direct GET. Non-success statuses become errors unless the page looks
    /// like a challenge, which is handled by the caller.
    async fn fetch_direct(&self, url: &str, headers: &[(String, String)]) -> Result<FetchedPage> {
        let page = self.http.fetch(url, headers).await?;
        if !page.is_success() && !self.detector.inspect(&page).is_blocked() {
            return Err(SearchError::HttpStatus {
                status: page.status,
                url: url.to_string(),
            });
        }
        Ok(page)
    }

    fn is_browser_first(&self, target: &Url) -> bool {
        let Some(host) = target.host_str() else {
            return false;
        };
        self.browser_first_hosts
            .iter()
            .any(|domain| host_matches(host, domain))
    }

    /// The browser fallback. Runs at most once per fetch.
    async fn render(
        &self,
        url: &str,
        trigger: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Retrieved> {
        let Some(renderer) = self.renderer.as_ref() else {
            return Err(SearchError::FetchFailed("browser fallback disabled".to_string()));
        };
        diagnostics.flag(Flag::BrowserFallback {
            trigger: trigger.to_string(),
        });
        info!(url, trigger, "browser fallback");

        let started = Instant::now();
        let rendered =
            tokio::time::timeout(self.render_timeout, renderer.render(url, self.challenge_wait)).await;
        let elapsed = started.elapsed();

        let html = match rendered {
            Ok(Ok(html)) => {
                diagnostics.record(
                    Attempt::new(Stage::Browser, "browser", AttemptOutcome::Success { count: 1 })
                        .with_elapsed(elapsed),
                );
                html
            }
            Ok(Err(SearchError::BrowserFallbackTimeout(after_ms))) => {
                record_timeout(diagnostics, after_ms, elapsed);
                return Err(SearchError::BrowserFallbackTimeout(after_ms));
            }
            Ok(Err(e)) => {
                diagnostics.record(
                    Attempt::new(
                        Stage::Browser,
                        "browser",
                        AttemptOutcome::Error {
                            message: e.to_string(),
                            class: e.class(),
                        },
                    )
                    .with_elapsed(elapsed),
                );
                return Err(SearchError::FetchFailed(format!("browser fallback failed: {e}")));
            }
            Err(_) => {
                let after_ms = self.render_timeout.as_millis() as u64;
                warn!(url, after_ms, "browser fallback timed out");
                record_timeout(diagnostics, after_ms, elapsed);
                return Err(SearchError::BrowserFallbackTimeout(after_ms));
            }
        };

        let blocked = self.detector.inspect_html(&html).reason;
        if let Some(reason) = blocked {
            debug!(url, reason = %reason, "rendered page still blocked");
            diagnostics.flag(Flag::ChallengeDetected {
                reason: reason.to_string(),
            });
        }

        let extracted = match self.extractor.extract(&html, url, diagnostics) {
            Ok(page) if blocked.is_none() || page.quality >= BLOCKED_MIN_QUALITY => Ok(page),
            Ok(page) => Err(SearchError::InsufficientQuality {
                best_score: page.quality,
                best_chars: page.chars,
            }),
            Err(e) => Err(e),
        };

        let page = match extracted {
            Ok(page) => page,
            Err(e @ (SearchError::InsufficientQuality { .. } | SearchError::Parse(_))) => {
                match self.extractor.degraded(&html, url) {
                    Some(page) => {
                        info!(url, "returning degraded page");
                        diagnostics.flag(Flag::Degraded);
                        page
                    }
                    None => {
                        return Err(match blocked {
                            Some(reason) => SearchError::ChallengeDetected(reason.to_string()),
                            None => e,
                        })
                    }
                }
            }
            Err(e) => return Err(e),
        };

        Ok(Retrieved {
            page,
            status: None,
            via_browser: true,
        })
    }

    /// Zhihu answers come from the answers API; the page itself is
    /// script-rendered and usually gated.
    async fn try_zhihu(&self, target: &Url, diagnostics: &mut Diagnostics) -> Option<Retrieved> {
        let id = zhihu_answer_id(target)?;
        let api_url = zhihu_answer_api_url(id);
        let headers = [("Accept".to_string(), "application/json".to_string())];

        let response = retry_call(
            &self.retry,
            Stage::SiteApi,
            "zhihu_api",
            self.fetch_timeout,
            diagnostics,
            |_| 1,
            |_| self.fetch_direct(&api_url, &headers),
        )
        .await
        .ok()?;

        let answer: ZhihuAnswer = match serde_json::from_str(&response.body) {
            Ok(answer) => answer,
            Err(e) => {
                debug!(url = %api_url, error = %e, "not an answer payload");
                diagnostics.record(Attempt::new(
                    Stage::SiteApi,
                    SITE_API_ZHIHU,
                    AttemptOutcome::Skipped {
                        reason: "response is not answer JSON".to_string(),
                    },
                ));
                return None;
            }
        };

        let title = answer
            .question
            .as_ref()
            .map(|q| q.title.trim().to_string())
            .filter(|t| !t.is_empty());
        let content = answer.render(self.extractor.format())?;
        let page = self
            .extractor
            .accept_rendered(target.as_str(), title, SITE_API_ZHIHU, &content, diagnostics)
            .ok()?;
        Some(Retrieved {
            page,
            status: Some(response.status),
            via_browser: false,
        })
    }

    /// Discourse topics render cleanly from their JSON API.
    async fn try_discourse(&self, target: &Url, diagnostics: &mut Diagnostics) -> Option<Retrieved> {
        if !is_discourse_topic(target) {
            return None;
        }
        let json_url = discourse_json_url(target)?;
        let headers = [("Accept".to_string(), "application/json".to_string())];

        let response = retry_call(
            &self.retry,
            Stage::SiteApi,
            "discourse_json",
            self.fetch_timeout,
            diagnostics,
            |_| 1,
            |_| self.fetch_direct(&json_url, &headers),
        )
        .await
        .ok()?;

        if self.detector.inspect(&response).is_blocked() {
            debug!(url = %json_url, "discourse API blocked");
            return None;
        }
        let topic: DiscourseTopic = match serde_json::from_str(&response.body) {
            Ok(topic) => topic,
            Err(e) => {
                debug!(url = %json_url, error = %e, "not a discourse topic");
                diagnostics.record(Attempt::new(
                    Stage::SiteApi,
                    SITE_API_DISCOURSE,
                    AttemptOutcome::Skipped {
                        reason: "response is not topic JSON".to_string(),
                    },
                ));
                return None;
            }
        };

        let title = Some(topic.title.trim().to_string()).filter(|t| !t.is_empty());
        let content = topic.render(self.extractor.format())?;
        let page = self
            .extractor
            .accept_rendered(target.as_str(), title, SITE_API_DISCOURSE, &content, diagnostics)
            .ok()?;
        Some(Retrieved {
            page,
            status: Some(response.status),
            via_browser: false,
        })
    }
}

fn record_timeout(diagnostics: &mut Diagnostics, after_ms: u64, elapsed: Duration) {
    diagnostics.record(
        Attempt::new(Stage::Browser, "browser", AttemptOutcome::Timeout { after_ms })
            .with_elapsed(elapsed),
    );
}

/// Normalizes `raw` and rejects anything that is not a plain http(s) URL.
fn validate_target(raw: &str) -> Result<Url> {
    if raw.trim().is_empty() {
        return Err(SearchError::InvalidUrl("URL cannot be empty".to_string()));
    }
    let normalized = normalize_url(raw);
    let url = Url::parse(&normalized)
        .map_err(|e| SearchError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SearchError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(SearchError::InvalidUrl(
            "credentials in URL are not allowed".to_string(),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SearchError::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// `/t/<slug>/<id>/<post>` becomes `/t/<slug>/<id>.json`.
fn discourse_json_url(url: &Url) -> Option<String> {
    let mut json = url.clone();
    json.set_query(None);
    json.set_fragment(None);
    if url.path().ends_with(".json") {
        return Some(json.to_string());
    }

    let segments: Vec<&str> = url.path().split('/').filter(|s| !s.is_empty()).collect();
    let t = segments.iter().position(|s| *s == "t")?;
    let id = segments[t + 1..]
        .iter()
        .position(|s| s.bytes().all(|b| b.is_ascii_digit()))?
        + t
        + 1;
    json.set_path(&format!("/{}.json", segments[..=id].join("/")));
    Some(json.to_string())
}

fn zhihu_answer_api_url(id: &str) -> String {
    format!(
        "https://www.zhihu.com/api/v4/answers/{id}\
         ?include=content,excerpt,content_need_truncated,segment_infos"
    )
}

#[derive(Debug, Deserialize)]
struct ZhihuAnswer {
    #[serde(default)]
    content: String,
    #[serde(default)]
    content_need_truncated: bool,
    #[serde(default)]
    segment_infos: Vec<ZhihuSegment>,
    question: Option<ZhihuQuestion>,
}

#[derive(Debug, Deserialize)]
struct ZhihuSegment {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ZhihuQuestion {
    #[serde(default)]
    title: String,
}

impl ZhihuAnswer {
    /// The answer HTML, completed from `segment_infos` when the API
    /// truncated it. Segments whose opening already appears are skipped.
    fn full_html(&self) -> String {
        let mut html = self.content.clone();
        if !self.content_need_truncated {
            return html;
        }
        let compact: String = self.content.split_whitespace().collect();
        for segment in &self.segment_infos {
            let text = segment.text.trim();
            if text.is_empty() {
                continue;
            }
            let opening: String = text
                .split_whitespace()
                .flat_map(str::chars)
                .take(20)
                .collect();
            if compact.contains(&opening) {
                continue;
            }
            html.push_str(&format!("<p>{}</p>", escape(text)));
        }
        html
    }

    fn render(&self, format: OutputFormat) -> Option<String> {
        if self.content.trim().is_empty() {
            return None;
        }
        let body = convert(&format!("<html><body>{}</body></html>", self.full_html()), format)?;
        let title = self.question.as_ref().map_or("", |q| q.title.trim());
        let joined = if title.is_empty() {
            body
        } else {
            format!("# {title}\n\n{body}")
        };
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct DiscourseTopic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    post_stream: DiscoursePostStream,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoursePostStream {
    #[serde(default)]
    posts: Vec<DiscoursePost>,
}

#[derive(Debug, Deserialize)]
struct DiscoursePost {
    #[serde(default)]
    username: String,
    post_number: Option<u64>,
    #[serde(default)]
    cooked: String,
}

impl DiscourseTopic {
    fn render(&self, format: OutputFormat) -> Option<String> {
        if self.post_stream.posts.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        let title = self.title.trim();
        if !title.is_empty() {
            parts.push(format!("# {title}"));
        }
        for post in &self.post_stream.posts {
            let cooked = post.cooked.trim();
            if cooked.is_empty() {
                continue;
            }
            let username = post.username.trim();
            if !username.is_empty() {
                parts.push(match post.post_number {
                    Some(n) => format!("## {username} · #{n}"),
                    None => format!("## {username}"),
                });
            }
            if let Some(body) = convert(&format!("<html><body>{cooked}</body></html>"), format) {
                parts.push(body);
            }
        }
        let joined = parts.join("\n\n");
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Jitter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Respond = Box<dyn Fn(&str, u32) -> Result<FetchedPage> + Send + Sync>;

    struct MockFetcher {
        respond: Respond,
        calls: Arc<AtomicU32>,
    }

    impl MockFetcher {
        fn new(respond: impl Fn(&str, u32) -> Result<FetchedPage> + Send + Sync + 'static) -> Self {
            Self {
                respond: Box::new(respond),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn page(status: u16, body: String) -> Self {
            Self::new(move |url, _| Ok(FetchedPage::new(url, status, body.clone())))
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str, _headers: &[(String, String)]) -> Result<FetchedPage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.respond)(url, call)
        }
    }

    struct MockRenderer {
        html: Option<String>,
        delay: Duration,
        calls: Arc<AtomicU32>,
    }

    impl MockRenderer {
        fn new(html: Option<String>) -> Self {
            Self {
                html,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl PageRenderer for MockRenderer {
        async fn render(&self, _url: &str, _challenge_wait: Duration) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.html
                .clone()
                .ok_or_else(|| SearchError::Browser("Failed to launch browser".to_string()))
        }
    }

    fn article() -> String {
        let body: String = (0..30)
            .map(|i| {
                format!(
                    "<p>Paragraph {i} describes how async tasks are polled by the runtime \
                     executor and woken again when their resources become ready.</p>"
                )
            })
            .collect();
        format!(
            r#"<html><head><title>Async in depth</title></head><body>
            <article><h1>Async in depth</h1>{body}</article></body></html>"#
        )
    }

    fn challenge_page() -> String {
        "<html><head><title>Just a moment...</title></head>\
         <body><div id=\"cf-browser-verification\">Checking your browser</div></body></html>"
            .to_string()
    }

    fn thin_page() -> String {
        r#"<html><head><title>Shell</title>
        <meta name="description" content="A page rendered by scripts."></head>
        <body><div id="app">Loading…</div></body></html>"#
            .to_string()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::ZERO)
            .with_jitter(Jitter::None)
    }

    fn fetcher(http: MockFetcher) -> Fetcher {
        Fetcher::new(http).with_retry_policy(fast_retry())
    }

    #[tokio::test]
    async fn test_direct_fetch_extracts() {
        let response = fetcher(MockFetcher::page(200, article()))
            .fetch(FetchRequest::new("https://example.com/post?utm_source=x"))
            .await
            .unwrap();
        assert_eq!(response.page.url, "https://example.com/post");
        assert_eq!(response.status, Some(200));
        assert!(!response.via_browser);
        assert!(response.page.content.starts_with("# Async in depth"));
        assert!(!response.diagnostics.browser_fallback_used());
        assert_eq!(response.diagnostics.attempts()[0].stage, Stage::DirectFetch);
    }

    #[tokio::test]
    async fn test_rejects_bad_targets() {
        let f = fetcher(MockFetcher::page(200, article()));
        for url in ["", "ftp://example.com/file", "https://user:pw@example.com/"] {
            let failure = f.fetch(FetchRequest::new(url)).await.unwrap_err();
            assert!(matches!(failure.error, SearchError::InvalidUrl(_)), "{url}");
            assert!(failure.diagnostics.is_empty());
        }
    }

    #[tokio::test]
    async fn test_challenge_without_renderer_is_terminal() {
        let failure = fetcher(MockFetcher::page(503, challenge_page()))
            .fetch(FetchRequest::new("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SearchError::ChallengeDetected(_)));
        assert!(failure
            .diagnostics
            .has_flag(|f| matches!(f, Flag::ChallengeDetected { .. })));
        // Blocked responses are not retried.
        assert_eq!(failure.diagnostics.attempts_for("http").count(), 1);
    }

    #[tokio::test]
    async fn test_challenge_triggers_single_browser_fallback() {
        let renderer = MockRenderer::new(Some(article()));
        let renders = Arc::clone(&renderer.calls);
        let response = fetcher(MockFetcher::page(503, challenge_page()))
            .with_renderer(renderer)
            .fetch(FetchRequest::new("https://example.com/post"))
            .await
            .unwrap();

        assert!(response.via_browser);
        assert_eq!(response.status, None);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        let diag = &response.diagnostics;
        assert!(diag.has_flag(|f| *f
            == Flag::BrowserFallback {
                trigger: "challenge".into()
            }));
        assert_eq!(
            diag.attempts()
                .iter()
                .filter(|a| a.stage == Stage::Browser)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_browser_timeout_is_terminal() {
        let mut renderer = MockRenderer::new(Some(article()));
        renderer.delay = Duration::from_secs(5);
        let renders = Arc::clone(&renderer.calls);
        let failure = fetcher(MockFetcher::page(503, challenge_page()))
            .with_renderer(renderer)
            .with_render_timeout(Duration::from_millis(20))
            .fetch(FetchRequest::new("https://example.com/"))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, SearchError::BrowserFallbackTimeout(20)));
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert!(failure.diagnostics.attempts().iter().any(|a| a.stage == Stage::Browser
            && a.outcome == AttemptOutcome::Timeout { after_ms: 20 }));
    }

    #[tokio::test]
    async fn test_browser_launch_failure_is_fetch_failed() {
        let failure = fetcher(MockFetcher::page(503, challenge_page()))
            .with_renderer(MockRenderer::new(None))
            .fetch(FetchRequest::new("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, SearchError::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_insufficient_quality_without_renderer() {
        let failure = fetcher(MockFetcher::page(200, thin_page()))
            .fetch(FetchRequest::new("https://example.com/app"))
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            SearchError::InsufficientQuality { .. }
        ));
        assert!(!failure.diagnostics.browser_fallback_used());
    }

    #[tokio::test]
    async fn test_thin_page_rendered_by_browser() {
        let response = fetcher(MockFetcher::page(200, thin_page()))
            .with_renderer(MockRenderer::new(Some(article())))
            .fetch(FetchRequest::new("https://example.com/app"))
            .await
            .unwrap();
        assert!(response.via_browser);
        assert!(response.diagnostics.has_flag(|f| *f
            == Flag::BrowserFallback {
                trigger: "insufficient_quality".into()
            }));
    }

    #[tokio::test]
    async fn test_rendered_thin_page_degrades() {
        let response = fetcher(MockFetcher::page(200, thin_page()))
            .with_renderer(MockRenderer::new(Some(thin_page())))
            .fetch(FetchRequest::new("https://example.com/app"))
            .await
            .unwrap();
        assert!(response.page.degraded);
        assert_eq!(response.page.content, "# Shell\n\nA page rendered by scripts.");
        assert!(response.diagnostics.has_flag(|f| *f == Flag::Degraded));
    }

    #[tokio::test]
    async fn test_http_error_statuses() {
        let http = MockFetcher::page(404, "<html><body>gone</body></html>".to_string());
        let calls = Arc::clone(&http.calls);
        let failure = fetcher(http)
            .fetch(FetchRequest::new("https://example.com/missing"))
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            SearchError::HttpStatus { status: 404, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let http = MockFetcher::new(|url, call| {
            if call < 3 {
                Ok(FetchedPage::new(url, 502, "<html><body>bad gateway</body></html>"))
            } else {
                Ok(FetchedPage::new(url, 200, article()))
            }
        });
        let response = fetcher(http)
            .fetch(FetchRequest::new("https://example.com/flaky"))
            .await
            .unwrap();
        assert_eq!(response.diagnostics.attempts_for("http").count(), 3);
    }

    #[tokio::test]
    async fn test_direct_failure_falls_back_to_browser() {
        let http = MockFetcher::new(|_, _| Err(SearchError::TransientNetwork("reset".into())));
        let response = fetcher(http)
            .with_renderer(MockRenderer::new(Some(article())))
            .fetch(FetchRequest::new("https://example.com/post"))
            .await
            .unwrap();
        assert!(response.via_browser);
        assert_eq!(response.diagnostics.attempts_for("http").count(), 3);
    }

    #[tokio::test]
    async fn test_browser_first_hosts_skip_direct_fetch() {
        let http = MockFetcher::page(200, article());
        let calls = Arc::clone(&http.calls);
        let response = fetcher(http)
            .with_renderer(MockRenderer::new(Some(article())))
            .with_browser_first_hosts(vec!["zhihu.com".to_string()])
            .fetch(FetchRequest::new("https://www.zhihu.com/question/1"))
            .await
            .unwrap();
        assert!(response.via_browser);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn zhihu_answer() -> String {
        let paragraphs: String = (0..12)
            .map(|i| {
                format!(
                    "<p>Point {i}: ownership moves values between bindings, and the borrow \
                     checker rejects references that outlive the data they point to.</p>"
                )
            })
            .collect();
        serde_json::json!({
            "content": paragraphs,
            "content_need_truncated": true,
            "segment_infos": [
                {"text": "Point 0: ownership moves values between bindings, and the borrow checker"},
                {"text": "Lifetimes only describe relationships the compiler already checks."},
                {"text": "   "}
            ],
            "question": {"title": "Why does Rust have a borrow checker?"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_zhihu_answer_uses_api_before_browser() {
        let answer = zhihu_answer();
        let http = MockFetcher::new(move |url, _| {
            assert_eq!(url, zhihu_answer_api_url("456"));
            Ok(FetchedPage::new(url, 200, answer.clone()))
        });
        let calls = Arc::clone(&http.calls);
        let renderer = MockRenderer::new(Some(article()));
        let renders = Arc::clone(&renderer.calls);

        let response = fetcher(http)
            .with_renderer(renderer)
            .with_browser_first_hosts(vec!["zhihu.com".to_string()])
            .fetch(FetchRequest::new("https://www.zhihu.com/question/123/answer/456"))
            .await
            .unwrap();

        assert_eq!(response.page.strategy, SITE_API_ZHIHU);
        assert!(!response.via_browser);
        assert_eq!(renders.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(response
            .page
            .content
            .starts_with("# Why does Rust have a borrow checker?"));
        assert!(response.page.content.contains("Lifetimes only describe relationships"));
        assert_eq!(response.page.content.matches("Point 0:").count(), 1);
    }

    #[tokio::test]
    async fn test_zhihu_api_failure_falls_back_to_browser() {
        let http = MockFetcher::page(403, challenge_page());
        let renderer = MockRenderer::new(Some(article()));
        let renders = Arc::clone(&renderer.calls);

        let response = fetcher(http)
            .with_renderer(renderer)
            .with_browser_first_hosts(vec!["zhihu.com".to_string()])
            .fetch(FetchRequest::new("https://www.zhihu.com/answer/456"))
            .await
            .unwrap();

        assert!(response.via_browser);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
        assert!(response.diagnostics.attempts_for("zhihu_api").count() >= 1);
    }

    #[test]
    fn test_zhihu_answer_completion() {
        let answer: ZhihuAnswer = serde_json::from_str(
            r#"{"content": "<p>First part.</p>", "content_need_truncated": false,
                "segment_infos": [{"text": "Second part."}]}"#,
        )
        .unwrap();
        assert_eq!(answer.full_html(), "<p>First part.</p>");

        let answer = ZhihuAnswer {
            content_need_truncated: true,
            ..answer
        };
        assert_eq!(answer.full_html(), "<p>First part.</p><p>Second part.</p>");
    }

    #[tokio::test]
    async fn test_truncation_flag() {
        let response = fetcher(MockFetcher::page(200, article()))
            .with_max_content_chars(200)
            .fetch(FetchRequest::new("https://example.com/post"))
            .await
            .unwrap();
        assert!(response.page.truncated);
        assert_eq!(response.page.content.chars().count(), 200);
        assert!(response.diagnostics.has_flag(|f| *f == Flag::Truncated));
    }

    #[tokio::test]
    async fn test_forwarding_flag() {
        let response = fetcher(MockFetcher::page(200, article()))
            .with_forwarding_flag(true)
            .fetch(FetchRequest::new("https://example.com/post"))
            .await
            .unwrap();
        assert!(response.via_forwarding);
        assert!(response.diagnostics.has_flag(|f| *f == Flag::ForwardingProxy));
    }

    #[tokio::test]
    async fn test_discourse_topic_uses_json_api() {
        let topic = serde_json::json!({
            "title": "Async traits in stable Rust",
            "post_stream": { "posts": [
                {
                    "username": "alice",
                    "post_number": 1,
                    "cooked": "<p>Async functions in traits are stable since 1.75, which removes the need for the async-trait macro in many cases.</p>"
                },
                {
                    "username": "bob",
                    "post_number": 2,
                    "cooked": "<p>Dynamic dispatch still needs boxing, so the macro remains useful for trait objects.</p>"
                }
            ]}
        })
        .to_string();

        let http = MockFetcher::new(move |url, _| {
            assert_eq!(url, "https://users.rust-lang.org/t/async-traits/1234.json");
            Ok(FetchedPage::new(url, 200, topic.clone()))
        });
        let response = fetcher(http)
            .fetch(FetchRequest::new(
                "https://users.rust-lang.org/t/async-traits/1234/5?u=someone",
            ))
            .await
            .unwrap();

        assert_eq!(response.page.strategy, SITE_API_DISCOURSE);
        assert!(response
            .page
            .content
            .starts_with("# Async traits in stable Rust\n\n## alice · #1"));
        assert!(response.page.content.contains("## bob · #2"));
        assert!(response
            .diagnostics
            .attempts()
            .iter()
            .all(|a| a.stage == Stage::SiteApi));
    }

    #[tokio::test]
    async fn test_discourse_falls_back_to_html() {
        let http = MockFetcher::new(|url, _| {
            if url.ends_with(".json") {
                Ok(FetchedPage::new(url, 404, "<html><body>not found</body></html>"))
            } else {
                Ok(FetchedPage::new(url, 200, article()))
            }
        });
        let response = fetcher(http)
            .fetch(FetchRequest::new("https://forum.example.com/t/topic/42"))
            .await
            .unwrap();
        assert_ne!(response.page.strategy, SITE_API_DISCOURSE);
        assert_eq!(response.diagnostics.attempts_for("discourse_json").count(), 1);
    }

    #[test]
    fn test_discourse_json_url() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            discourse_json_url(&url("https://meta.discourse.org/t/some-topic/123/4")).as_deref(),
            Some("https://meta.discourse.org/t/some-topic/123.json")
        );
        assert_eq!(
            discourse_json_url(&url("https://forum.example.com/t/123")).as_deref(),
            Some("https://forum.example.com/t/123.json")
        );
        assert!(discourse_json_url(&url("https://forum.example.com/t/no-id")).is_none());
        assert!(discourse_json_url(&url("https://example.com/about")).is_none());
    }
}
