//! Headless browser rendering for the fetch fallback.
//!
//! Only available with the `headless` Cargo feature. A single Chrome or
//! Chromium process is launched lazily and shared; a semaphore bounds the
//! number of open tabs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::challenge::looks_like_challenge_title;
use crate::fetcher::PageRenderer;
use crate::fetcher_http::DEFAULT_USER_AGENT;
use crate::{Result, SearchError};

/// Upper bound on waiting for the network to settle after navigation.
const NETWORK_IDLE_WAIT: Duration = Duration::from_secs(5);

/// Interval between title checks while a challenge is showing.
const CHALLENGE_POLL: Duration = Duration::from_secs(1);

const CHROME_BINARIES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

const CHROME_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

/// Configuration for the browser pool.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Maximum number of concurrent tabs.
    pub max_tabs: usize,
    pub headless: bool,
    /// Path to the Chrome/Chromium executable. Detected when `None`.
    pub chrome_path: Option<String>,
    pub proxy_url: Option<String>,
    pub user_agent: String,
    /// Additional launch arguments.
    pub launch_args: Vec<String>,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_tabs: 2,
            headless: true,
            chrome_path: None,
            proxy_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            launch_args: Vec::new(),
        }
    }
}

/// Finds a Chrome executable: the explicit path, then `PATH`, then the
/// usual install locations.
pub fn find_chrome(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = PathBuf::from(path);
        return if path.exists() {
            Ok(path)
        } else {
            Err(SearchError::Browser(format!(
                "Chrome executable not found at {}",
                path.display()
            )))
        };
    }

    CHROME_BINARIES
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            CHROME_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        })
        .ok_or_else(|| {
            SearchError::Browser(
                "No Chrome or Chromium installation found; set browser.chrome_path".to_string(),
            )
        })
}

/// A shared browser process with tab concurrency control.
pub struct BrowserPool {
    config: BrowserPoolConfig,
    browser: Mutex<Option<Arc<Browser>>>,
    tab_semaphore: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(config: BrowserPoolConfig) -> Self {
        let max_tabs = config.max_tabs.max(1);
        Self {
            config,
            browser: Mutex::new(None),
            tab_semaphore: Arc::new(Semaphore::new(max_tabs)),
        }
    }

    pub fn tab_semaphore(&self) -> &Arc<Semaphore> {
        &self.tab_semaphore
    }

    /// Lazily launches the browser and returns a shared handle.
    pub async fn acquire_browser(&self) -> Result<Arc<Browser>> {
        let mut guard = self.browser.lock().await;

        if let Some(ref browser) = *guard {
            return Ok(Arc::clone(browser));
        }

        let chrome = find_chrome(self.config.chrome_path.as_deref())?;
        info!(chrome = %chrome.display(), "launching headless browser");

        let mut builder = BrowserConfig::builder().chrome_executable(chrome);
        if self.config.headless {
            builder = builder.arg("--headless=new");
        }

        // --headless=new puts "HeadlessChrome" into the UA
        builder = builder
            .arg(format!("--user-agent={}", self.config.user_agent))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--mute-audio")
            .arg("--no-first-run");

        if let Some(ref proxy) = self.config.proxy_url {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        for arg in &self.config.launch_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| SearchError::Browser(format!("Failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to launch browser: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {e}");
                }
            }
            debug!("Browser CDP handler exited");
        });

        let browser = Arc::new(browser);
        *guard = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Drops the shared browser handle.
    pub async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        if guard.take().is_some() {
            debug!("Browser pool shut down");
        }
    }
}

/// Renders pages in the pooled browser.
///
/// Each render opens a tab, navigates within `navigation_timeout`, waits
/// briefly for the network to settle, then polls the title once a second
/// until it no longer looks like a challenge or `challenge_wait` runs out.
pub struct ChromeRenderer {
    pool: Arc<BrowserPool>,
    navigation_timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self {
            pool,
            navigation_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str, challenge_wait: Duration) -> Result<String> {
        let _permit = self
            .pool
            .tab_semaphore()
            .acquire()
            .await
            .map_err(|e| SearchError::Browser(format!("Tab semaphore closed: {e}")))?;

        let browser = self.pool.acquire_browser().await?;

        let page = tokio::time::timeout(self.navigation_timeout, browser.new_page(url))
            .await
            .map_err(|_| {
                SearchError::BrowserFallbackTimeout(self.navigation_timeout.as_millis() as u64)
            })?
            .map_err(|e| SearchError::Browser(format!("Failed to open tab: {e}")))?;

        if let Err(e) = page
            .set_user_agent(SetUserAgentOverrideParams::new(
                self.pool.config.user_agent.clone(),
            ))
            .await
        {
            debug!("Failed to set user agent: {e}");
        }

        if tokio::time::timeout(NETWORK_IDLE_WAIT, page.wait_for_navigation())
            .await
            .is_err()
        {
            debug!(url, "network did not settle, continuing");
        }

        let polls = challenge_wait.as_secs().max(1);
        for _ in 0..polls {
            let title = page.get_title().await.ok().flatten().unwrap_or_default();
            if !looks_like_challenge_title(&title) {
                break;
            }
            debug!(url, title = %title, "waiting for challenge to clear");
            tokio::time::sleep(CHALLENGE_POLL).await;
        }

        let html = page
            .content()
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to get page content: {e}")))?;

        if let Err(e) = page.close().await {
            warn!("Failed to close browser tab: {e}");
        }

        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = BrowserPoolConfig::default();
        assert_eq!(config.max_tabs, 2);
        assert!(config.headless);
        assert!(config.chrome_path.is_none());
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_pool_permits() {
        let pool = BrowserPool::new(BrowserPoolConfig {
            max_tabs: 3,
            ..Default::default()
        });
        assert_eq!(pool.tab_semaphore().available_permits(), 3);

        let pool = BrowserPool::new(BrowserPoolConfig {
            max_tabs: 0,
            ..Default::default()
        });
        assert_eq!(pool.tab_semaphore().available_permits(), 1);
    }

    #[test]
    fn test_find_chrome_explicit_missing() {
        let err = find_chrome(Some("/nonexistent/chrome-binary")).unwrap_err();
        assert!(matches!(err, SearchError::Browser(_)));
    }

    #[tokio::test]
    async fn test_launch_fails_with_bad_path() {
        let pool = Arc::new(BrowserPool::new(BrowserPoolConfig {
            chrome_path: Some("/nonexistent/chrome-binary".to_string()),
            ..Default::default()
        }));
        let renderer = ChromeRenderer::new(pool).with_navigation_timeout(Duration::from_secs(1));
        let err = renderer
            .render("https://example.com", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Browser(_)));
    }

    #[tokio::test]
    async fn test_shutdown_without_launch() {
        let pool = BrowserPool::new(BrowserPoolConfig::default());
        pool.shutdown().await;
        pool.shutdown().await;
    }
}
