//! Headless Chromium renderer using chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use super::{PageRenderer, RenderProfile};
use crate::config::RenderConfig;
use crate::error::FetchError;

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Launches one browser on first use and opens a fresh tab per render.
pub struct ChromiumRenderer {
    chrome_path: Option<String>,
    user_agent: String,
    browser: Mutex<Option<Browser>>,
}

impl ChromiumRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            user_agent: config.user_agent.clone(),
            browser: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<Browser, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.user_agent));

        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .build()
            .map_err(|e| FetchError::Browser(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to launch Chromium: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            debug!("Chromium handler stopped");
        });

        info!("🌐 Chromium launched");
        Ok(browser)
    }

    async fn read_page(page: &Page, profile: &RenderProfile) -> Result<String, FetchError> {
        if let Err(e) = page.wait_for_navigation().await {
            debug!("Navigation did not settle cleanly: {}", e);
        }
        sleep(profile.settle).await;

        for _ in 0..profile.scrolls {
            page.evaluate(SCROLL_TO_BOTTOM)
                .await
                .map_err(|e| FetchError::Browser(format!("scroll failed: {e}")))?;
            sleep(profile.scroll_pause).await;
        }

        page.content()
            .await
            .map_err(|e| FetchError::Browser(format!("failed to read content: {e}")))
    }

    async fn render_in(browser: &Browser, url: &str, profile: &RenderProfile) -> Result<String, FetchError> {
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to open {url}: {e}")))?;

        let html = Self::read_page(&page, profile).await;
        if let Err(e) = page.close().await {
            debug!("Failed to close tab for {}: {}", url, e);
        }
        html
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str, profile: &RenderProfile) -> Result<String, FetchError> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let Some(browser) = guard.as_ref() else {
            return Err(FetchError::Browser("browser unavailable".to_string()));
        };

        let result = match timeout(profile.timeout, Self::render_in(browser, url, profile)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                secs: profile.timeout.as_secs(),
            }),
        };

        // A failed render may leave the browser wedged; relaunch on next use.
        if result.is_err() {
            if let Some(mut browser) = guard.take() {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close Chromium after render error: {}", e);
                }
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}
