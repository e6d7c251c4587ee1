//! Headless browser fetcher
//!
//! One Chromium process is launched on first use and shared by every rendered fetch.
//! Each fetch gets its own page, which is closed on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use http::StatusCode;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{FetchResult, PageFetcher, HTML_CONTENT_TYPE};
use crate::config::{RenderConfig, DEFAULT_USER_AGENT};
use crate::error::{PortalError, Result};

const VIEWPORT: (u32, u32) = (1200, 900);
const QUIESCENCE_POLL: Duration = Duration::from_millis(250);
/// Consecutive unchanged polls before the network is considered idle
const QUIESCENCE_IDLE_POLLS: u32 = 2;
const LOAD_STATE_SCRIPT: &str =
    "document.readyState + ':' + performance.getEntriesByType('resource').length";

/// Rendered fetcher configuration
#[derive(Debug, Clone)]
pub struct RenderedFetcherConfig {
    /// Bound for navigation plus network quiescence
    pub navigation_timeout: Duration,
    /// Extra wait after quiescence for late rendering
    pub settle_delay: Duration,
    /// Chromium binary, auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
    /// User agent for every page
    pub user_agent: String,
}

impl Default for RenderedFetcherConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl RenderedFetcherConfig {
    pub fn from_config(render: &RenderConfig, user_agent: &str) -> Self {
        Self {
            navigation_timeout: render.timeout(),
            settle_delay: render.settle_delay(),
            chrome_executable: render.chrome_executable.clone(),
            user_agent: user_agent.to_string(),
        }
    }
}

/// Starts a browser; one call per fetcher lifetime unless the launch fails
#[async_trait]
pub(crate) trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &RenderedFetcherConfig) -> Result<Arc<dyn BrowserSession>>;
}

/// A running browser shared by every rendered fetch
#[async_trait]
pub(crate) trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn RenderPage>>;
    async fn close(&self);
}

/// One browser tab
#[async_trait]
pub(crate) trait RenderPage: Send + Sync {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;
    async fn goto(&self, target: &Url) -> Result<()>;
    /// `readyState:resourceCount`, or `None` if the page could not be queried
    async fn load_state(&self) -> Option<String>;
    async fn content(&self) -> Result<String>;
    async fn current_url(&self) -> Option<String>;
    async fn close(&self);
}

/// Launches a local headless Chromium
struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, config: &RenderedFetcherConfig) -> Result<Arc<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT.0, VIEWPORT.1)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if let Some(ref path) = config.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| PortalError::BrowserUnavailable(format!("Invalid browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PortalError::BrowserUnavailable(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        Ok(Arc::new(ChromiumSession {
            browser: Mutex::new(browser),
            handler,
        }))
    }
}

/// A launched browser and the task driving its CDP connection
struct ChromiumSession {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Arc<dyn RenderPage>> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PortalError::Render(format!("Failed to open page: {}", e)))?;
        Ok(Arc::new(ChromiumPage(page)))
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        let _ = browser.wait().await;
        self.handler.abort();
    }
}

struct ChromiumPage(Page);

#[async_trait]
impl RenderPage for ChromiumPage {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.0
            .execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .map(|_| ())
            .map_err(|e| PortalError::Render(format!("Failed to set user agent: {}", e)))
    }

    async fn goto(&self, target: &Url) -> Result<()> {
        self.0
            .goto(target.as_str())
            .await
            .map(|_| ())
            .map_err(|e| PortalError::Render(e.to_string()))
    }

    async fn load_state(&self) -> Option<String> {
        match self.0.evaluate(LOAD_STATE_SCRIPT).await {
            Ok(result) => result.into_value::<String>().ok(),
            Err(e) => {
                debug!("Load state check failed: {}", e);
                None
            }
        }
    }

    async fn content(&self) -> Result<String> {
        self.0
            .content()
            .await
            .map_err(|e| PortalError::Render(format!("Failed to read page content: {}", e)))
    }

    async fn current_url(&self) -> Option<String> {
        self.0.url().await.ok().flatten()
    }

    async fn close(&self) {
        if let Err(e) = self.0.clone().close().await {
            debug!("Failed to close page: {}", e);
        }
    }
}

/// Closes the page when dropped unless it was closed explicitly
struct PageGuard {
    page: Arc<dyn RenderPage>,
    armed: bool,
}

impl PageGuard {
    fn new(page: Arc<dyn RenderPage>) -> Self {
        Self { page, armed: true }
    }

    async fn close(mut self) {
        self.armed = false;
        self.page.close().await;
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        // The fetch future was cancelled mid-flight.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let page = Arc::clone(&self.page);
            handle.spawn(async move { page.close().await });
        }
    }
}

/// Loads targets in a shared headless Chromium and snapshots the live DOM
pub struct RenderedFetcher {
    config: RenderedFetcherConfig,
    launcher: Arc<dyn BrowserLauncher>,
    session: OnceCell<Arc<dyn BrowserSession>>,
}

impl RenderedFetcher {
    /// Create a new rendered fetcher; the browser is not launched until first use
    pub fn new(config: RenderedFetcherConfig) -> Self {
        Self::with_launcher(config, Arc::new(ChromiumLauncher))
    }

    pub(crate) fn with_launcher(
        config: RenderedFetcherConfig,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            launcher,
            session: OnceCell::new(),
        }
    }

    /// Whether the shared browser has been launched
    pub fn is_running(&self) -> bool {
        self.session.initialized()
    }

    /// Get the shared browser, launching it exactly once
    async fn session(&self) -> Result<Arc<dyn BrowserSession>> {
        self.session
            .get_or_try_init(|| async {
                info!("Launching headless browser");
                let session = self.launcher.launch(&self.config).await?;
                info!("Headless browser ready");
                Ok::<_, PortalError>(session)
            })
            .await
            .cloned()
    }

    /// Navigate, wait for the page to settle and extract the markup
    async fn capture(&self, page: &dyn RenderPage, target: &Url) -> Result<FetchResult> {
        page.set_user_agent(&self.config.user_agent).await?;

        let navigation = async {
            if let Err(e) = page.goto(target).await {
                warn!("Navigation to {} did not complete: {}", target, e);
            }
            wait_for_quiescence(page).await;
        };

        // Best effort: whatever has materialised by the deadline is captured.
        if timeout(self.config.navigation_timeout, navigation).await.is_err() {
            warn!(
                "Navigation to {} still busy after {:?}, capturing snapshot",
                target, self.config.navigation_timeout
            );
        }

        sleep(self.config.settle_delay).await;

        let content = page.content().await?;
        let final_url = page
            .current_url()
            .await
            .and_then(|current| Url::parse(&current).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or_else(|| target.clone());

        Ok(FetchResult {
            content_type: HTML_CONTENT_TYPE.to_string(),
            body: Bytes::from(content),
            final_url,
            status: StatusCode::OK,
        })
    }
}

/// Poll until the document is complete and no new resources appeared for a while
async fn wait_for_quiescence(page: &dyn RenderPage) {
    let mut last: Option<String> = None;
    let mut idle_polls = 0;

    loop {
        sleep(QUIESCENCE_POLL).await;

        let Some(state) = page.load_state().await else {
            idle_polls = 0;
            continue;
        };

        if state.starts_with("complete:") && last.as_deref() == Some(state.as_str()) {
            idle_polls += 1;
            if idle_polls >= QUIESCENCE_IDLE_POLLS {
                return;
            }
        } else {
            idle_polls = 0;
        }
        last = Some(state);
    }
}

#[async_trait]
impl PageFetcher for RenderedFetcher {
    #[instrument(skip(self), fields(target = %target))]
    async fn fetch(&self, target: &Url) -> Result<FetchResult> {
        let session = self.session().await?;
        let started = Instant::now();

        let page = session.new_page().await?;
        let guard = PageGuard::new(Arc::clone(&page));

        let result = self.capture(page.as_ref(), target).await;
        guard.close().await;

        debug!("Rendered {} in {:?}", target, started.elapsed());
        result
    }

    async fn shutdown(&self) {
        let Some(session) = self.session.get() else {
            return;
        };

        info!("Closing headless browser");
        session.close().await;
    }

    fn fetcher_name(&self) -> &'static str {
        "rendered"
    }
}
