//! Runtime configuration.
//!
//! A [`Config`] starts from defaults, is optionally read from TOML, and is
//! then overlaid from environment variables. Every section has
//! `#[serde(default)]` so a file only needs the keys it changes.
//! Unparseable environment values are logged and ignored; [`Config::validate`]
//! rejects combinations that cannot work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::extract::{
    ExtractionMode, OutputFormat, DEFAULT_MARKDOWN_MIN_CHARS, DEFAULT_TEXT_MIN_CHARS,
};
use crate::fetcher_http::{ClientOptions, DEFAULT_USER_AGENT};
use crate::forward::ForwardProxyConfig;
use crate::proxy::{ForwardingEndpoint, ProxyConfig};
use crate::retry::RetryPolicy;
use crate::summarize::DEFAULT_MODEL;
use crate::{Result, SearchError};

/// Characters per token used to turn `MAX_TOKEN_LIMIT` into a char budget.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchSettings,
    pub fetch: FetchSettings,
    pub browser: BrowserSettings,
    pub llm: LlmSettings,
    pub proxy: ProxySettings,
    pub forward: ForwardProxyConfig,
}

/// Backend chain, limits, and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Generic engines in priority order.
    pub engines: Vec<String>,
    pub engine_timeout_s: u64,
    /// Budget for the whole search, summary included.
    pub timeout_s: u64,
    pub result_limit: usize,
    /// Results allowed per registrable domain; 0 disables the cap.
    pub max_per_domain: usize,
    pub retry: RetryPolicy,
    /// Enable the Wikipedia and StackExchange site backends.
    pub site_backends: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            engines: vec!["brave".to_string(), "duckduckgo".to_string()],
            engine_timeout_s: 15,
            timeout_s: 60,
            result_limit: 25,
            max_per_domain: 2,
            retry: RetryPolicy::default(),
            site_backends: true,
        }
    }
}

impl SearchSettings {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Direct retrieval and extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_s: u64,
    pub markdown_min_chars: usize,
    pub text_min_chars: usize,
    pub mode: ExtractionMode,
    pub format: OutputFormat,
    pub max_content_chars: usize,
    /// Hosts (and their subdomains) that skip direct retrieval.
    pub browser_first_hosts: Vec<String>,
    pub user_agent: Option<String>,
    /// Directory holding `noise_en.txt` / `noise_zh.txt`.
    pub noise_rules_dir: Option<PathBuf>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_s: 15,
            markdown_min_chars: DEFAULT_MARKDOWN_MIN_CHARS,
            text_min_chars: DEFAULT_TEXT_MIN_CHARS,
            mode: ExtractionMode::default(),
            format: OutputFormat::default(),
            max_content_chars: 10_000 * CHARS_PER_TOKEN,
            browser_first_hosts: vec![
                "xiaohongshu.com".to_string(),
                "xhslink.com".to_string(),
                "zhihu.com".to_string(),
            ],
            user_agent: None,
            noise_rules_dir: None,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Headless browser fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enabled: bool,
    pub render_timeout_ms: u64,
    /// How long a rendered page may keep showing a challenge.
    pub challenge_wait_s: u64,
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub user_agent: Option<String>,
    pub max_tabs: usize,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            render_timeout_ms: 60_000,
            challenge_wait_s: 20,
            headless: true,
            chrome_path: None,
            user_agent: None,
            max_tabs: 2,
        }
    }
}

impl BrowserSettings {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn challenge_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_wait_s)
    }
}

/// OpenAI-compatible summarization endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_s: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_s: 60,
        }
    }
}

impl LlmSettings {
    /// `(base_url, api_key)` when both are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (non_empty(&self.base_url), non_empty(&self.api_key)) {
            (Some(base), Some(key)) => Some((base.to_string(), key.to_string())),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Outbound routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// `http://`, `https://`, or `socks5://` proxy for all outbound HTTP.
    pub outbound: Option<String>,
    /// Base URL of a deployed forwarding proxy used for direct fetches.
    pub forwarding_endpoint: Option<String>,
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| SearchError::Config(format!("invalid TOML: {e}")))
    }

    /// Reads a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            SearchError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&source)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlays values from `lookup`; unparseable values are logged and skipped.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = Env(&lookup);

        if let Some(v) = env.string("PROXY") {
            self.proxy.outbound = Some(v);
        }
        if let Some(v) = env.string("CF_WORKER") {
            self.proxy.forwarding_endpoint = Some(v);
        }
        if let Some(v) = env.string("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = env.string("OPENAI_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = env.string("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env.string("USER_AGENT") {
            self.fetch.user_agent = Some(v);
        }

        if let Some(v) = env.list("SEARCH_ENGINES") {
            self.search.engines = v;
        }
        env.number("SEARCH_TIMEOUT_S", 1, &mut self.search.timeout_s);
        env.number("SEARCH_ENGINE_TIMEOUT_S", 1, &mut self.search.engine_timeout_s);
        env.number("SEARCH_RESULT_LIMIT", 1, &mut self.search.result_limit);
        env.number("SEARCH_MAX_PER_DOMAIN", 0, &mut self.search.max_per_domain);
        env.number("SEARCH_RETRY_ATTEMPTS", 1, &mut self.search.retry.max_attempts);

        env.number("FETCH_TIMEOUT_S", 1, &mut self.fetch.timeout_s);
        let mut tokens = 0usize;
        if env.number("MAX_TOKEN_LIMIT", 1, &mut tokens) {
            self.fetch.max_content_chars = tokens * CHARS_PER_TOKEN;
        }
        env.parsed("EXTRACTION_STRATEGY", &mut self.fetch.mode);
        env.parsed("EXTRACTION_FORMAT", &mut self.fetch.format);
        env.number("EXTRACTION_MARKDOWN_MIN_CHARS", 1, &mut self.fetch.markdown_min_chars);
        env.number("EXTRACTION_TEXT_MIN_CHARS", 1, &mut self.fetch.text_min_chars);
        if let Some(v) = env.list("BROWSER_FIRST_HOSTS") {
            self.fetch.browser_first_hosts = v;
        }
        if let Some(v) = env.string("NOISE_RULES_DIR") {
            self.fetch.noise_rules_dir = Some(PathBuf::from(v));
        }

        env.flag("PLAYWRIGHT_FALLBACK", &mut self.browser.enabled);
        env.number("PLAYWRIGHT_TIMEOUT_MS", 1, &mut self.browser.render_timeout_ms);
        env.number("PLAYWRIGHT_CHALLENGE_WAIT", 0, &mut self.browser.challenge_wait_s);
        env.flag("PW_HEADLESS", &mut self.browser.headless);
        if let Some(v) = env.first(&[
            "PW_EXECUTABLE_PATH",
            "PW_CHROMIUM_EXECUTABLE_PATH",
            "PLAYWRIGHT_EXECUTABLE_PATH",
        ]) {
            self.browser.chrome_path = Some(v);
        }
        if let Some(v) = env.string("PW_USER_AGENT") {
            self.browser.user_agent = Some(v);
        }

        if let Some(v) = env.string("PROXY_BIND") {
            self.forward.bind = v;
        }
        if let Some(v) = env.list("PROXY_ALLOWLIST") {
            self.forward.allowlist = v;
        }
        env.flag("PROXY_BLOCK_PRIVATE_HOSTS", &mut self.forward.block_private_hosts);
        env.flag("PROXY_FORWARD_COOKIES", &mut self.forward.forward_cookies);
        env.flag("PROXY_RESOLVE_DNS", &mut self.forward.resolve_dns);
        env.number("PROXY_UPSTREAM_TIMEOUT_MS", 1, &mut self.forward.upstream_timeout_ms);
        env.number("PROXY_CACHE_TTL_S", 0, &mut self.forward.cache_ttl_s);
    }

    /// Rejects values no component can work with, reporting all of them.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.search.engines.is_empty() && !self.search.site_backends {
            errors.push("search.engines must not be empty".to_string());
        }
        if self.search.engine_timeout_s == 0 || self.search.timeout_s == 0 {
            errors.push("search timeouts must be positive".to_string());
        }
        if self.search.result_limit == 0 {
            errors.push("search.result_limit must be positive".to_string());
        }
        if self.search.retry.max_attempts == 0 {
            errors.push("search.retry.max_attempts must be at least 1".to_string());
        }
        if self.search.retry.base_delay_ms > self.search.retry.max_delay_ms {
            errors.push("search.retry.base_delay_ms must be <= max_delay_ms".to_string());
        }
        if self.fetch.timeout_s == 0 {
            errors.push("fetch.timeout_s must be positive".to_string());
        }
        if self.fetch.markdown_min_chars == 0 || self.fetch.text_min_chars == 0 {
            errors.push("fetch minimum character thresholds must be positive".to_string());
        }
        if self.fetch.max_content_chars == 0 {
            errors.push("fetch.max_content_chars must be positive".to_string());
        }
        if self.browser.enabled && self.browser.render_timeout_ms == 0 {
            errors.push("browser.render_timeout_ms must be positive".to_string());
        }
        if self.forward.upstream_timeout_ms == 0 {
            errors.push("forward.upstream_timeout_ms must be positive".to_string());
        }
        if let Err(e) = self.outbound_proxy() {
            errors.push(e.to_string());
        }
        if let Err(e) = self.forwarding_endpoint() {
            errors.push(e.to_string());
        }
        if self.llm.api_key.is_some() != self.llm.base_url.is_some() {
            warn!("LLM summary disabled: both OPENAI_API_KEY and OPENAI_BASE_URL are required");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SearchError::Config(errors.join("; ")))
        }
    }

    pub fn outbound_proxy(&self) -> Result<Option<ProxyConfig>> {
        non_empty(&self.proxy.outbound)
            .map(ProxyConfig::parse)
            .transpose()
    }

    pub fn forwarding_endpoint(&self) -> Result<Option<ForwardingEndpoint>> {
        non_empty(&self.proxy.forwarding_endpoint)
            .map(ForwardingEndpoint::new)
            .transpose()
    }

    /// Client settings for outbound requests with the given timeout.
    pub fn client_options(&self, timeout: Duration) -> Result<ClientOptions> {
        Ok(ClientOptions {
            user_agent: self.user_agent().to_string(),
            timeout,
            proxy: self.outbound_proxy()?,
        })
    }

    pub fn user_agent(&self) -> &str {
        non_empty(&self.fetch.user_agent).unwrap_or(DEFAULT_USER_AGENT)
    }

    /// Browser user agent, falling back to the HTTP one.
    pub fn browser_user_agent(&self) -> &str {
        non_empty(&self.browser.user_agent).unwrap_or_else(|| self.user_agent())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Typed reads over an environment lookup.
struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.string(k))
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }

    fn flag(&self, key: &str, target: &mut bool) {
        let Some(raw) = self.string(key) else {
            return;
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *target = true,
            "0" | "false" | "no" | "off" => *target = false,
            _ => warn!(key, value = %raw, kept = *target, "invalid boolean, ignored"),
        }
    }

    /// Sets `target` when the value parses and is at least `minimum`.
    fn number<T>(&self, key: &str, minimum: T, target: &mut T) -> bool
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
    {
        let Some(raw) = self.string(key) else {
            return false;
        };
        match raw.parse::<T>() {
            Ok(value) if value >= minimum => {
                *target = value;
                true
            }
            Ok(value) => {
                warn!(key, value = %value, minimum = %minimum, "value below minimum, ignored");
                false
            }
            Err(_) => {
                warn!(key, value = %raw, "invalid number, ignored");
                false
            }
        }
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, target: &mut T) {
        let Some(raw) = self.string(key) else {
            return;
        };
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "invalid value, ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.search.engines, vec!["brave", "duckduckgo"]);
        assert_eq!(config.search.result_limit, 25);
        assert_eq!(config.search.max_per_domain, 2);
        assert_eq!(config.search.retry.max_attempts, 3);
        assert_eq!(config.fetch.markdown_min_chars, 120);
        assert_eq!(config.fetch.text_min_chars, 200);
        assert_eq!(config.fetch.max_content_chars, 40_000);
        assert_eq!(config.fetch.mode, ExtractionMode::Quality);
        assert!(config.browser.enabled);
        assert_eq!(config.browser.render_timeout(), Duration::from_secs(60));
        assert_eq!(config.llm.model, "gpt-4o");
        assert!(config.llm.credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [search]
            engines = ["duckduckgo"]
            max_per_domain = 0

            [search.retry]
            max_attempts = 5

            [fetch]
            mode = "speed"
            format = "text"

            [forward]
            allowlist = ["*.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.search.engines, vec!["duckduckgo"]);
        assert_eq!(config.search.max_per_domain, 0);
        assert_eq!(config.search.retry.max_attempts, 5);
        assert_eq!(config.search.retry.base_delay_ms, 300);
        assert_eq!(config.search.result_limit, 25);
        assert_eq!(config.fetch.mode, ExtractionMode::Speed);
        assert_eq!(config.fetch.format, OutputFormat::Text);
        assert_eq!(config.forward.allowlist, vec!["*.example.com"]);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[search]\nresult_limit = \"many\"").unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("PROXY", "socks5://127.0.0.1:1080"),
            ("CF_WORKER", "https://proxy.example.workers.dev/"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "https://llm.example.com/v1"),
            ("SEARCH_MAX_PER_DOMAIN", "0"),
            ("SEARCH_RESULT_LIMIT", "10"),
            ("MAX_TOKEN_LIMIT", "2000"),
            ("EXTRACTION_STRATEGY", "balanced"),
            ("PLAYWRIGHT_FALLBACK", "off"),
            ("PW_CHROMIUM_EXECUTABLE_PATH", "/opt/chromium"),
            ("PROXY_ALLOWLIST", "example.com, *.github.io"),
        ]));

        assert_eq!(config.search.max_per_domain, 0);
        assert_eq!(config.search.result_limit, 10);
        assert_eq!(config.fetch.max_content_chars, 8_000);
        assert_eq!(config.fetch.mode, ExtractionMode::Balanced);
        assert!(!config.browser.enabled);
        assert_eq!(config.browser.chrome_path.as_deref(), Some("/opt/chromium"));
        assert_eq!(config.forward.allowlist, vec!["example.com", "*.github.io"]);
        assert_eq!(
            config.llm.credentials(),
            Some(("https://llm.example.com/v1".to_string(), "sk-test".to_string()))
        );
        assert!(config.outbound_proxy().unwrap().is_some());
        assert_eq!(
            config.forwarding_endpoint().unwrap().unwrap().base(),
            "https://proxy.example.workers.dev"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_values_keep_defaults() {
        let mut config = Config::default();
        config.apply_env_from(env(&[
            ("SEARCH_RESULT_LIMIT", "lots"),
            ("SEARCH_MAX_PER_DOMAIN", "-1"),
            ("FETCH_TIMEOUT_S", "0"),
            ("PLAYWRIGHT_FALLBACK", "maybe"),
            ("EXTRACTION_STRATEGY", "thorough"),
        ]));
        assert_eq!(config.search.result_limit, 25);
        assert_eq!(config.search.max_per_domain, 2);
        assert_eq!(config.fetch.timeout_s, 15);
        assert!(config.browser.enabled);
        assert_eq!(config.fetch.mode, ExtractionMode::Quality);
    }

    #[test]
    fn test_llm_requires_both_values() {
        let mut config = Config::default();
        config.apply_env_from(env(&[("OPENAI_API_KEY", "sk-test")]));
        assert!(config.llm.credentials().is_none());
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = Config::default();
        config.search.result_limit = 0;
        config.search.retry.max_attempts = 0;
        config.proxy.outbound = Some("ftp://nowhere".to_string());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("result_limit"));
        assert!(err.contains("max_attempts"));
    }

    #[test]
    fn test_user_agent_fallbacks() {
        let mut config = Config::default();
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(config.browser_user_agent(), DEFAULT_USER_AGENT);
        config.fetch.user_agent = Some("custom/1.0".to_string());
        assert_eq!(config.browser_user_agent(), "custom/1.0");
        let options = config.client_options(Duration::from_secs(3)).unwrap();
        assert_eq!(options.user_agent, "custom/1.0");
        assert_eq!(options.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/websearch.toml").unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }
}
