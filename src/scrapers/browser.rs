//! Rendered-browser acquisition tier.
//!
//! Drives a stealth-patched Chromium session over CDP for pages the direct
//! tier cannot reach: a fresh fingerprint per attempt, optional proxy from
//! the pool, anti-detection overrides injected before navigation, and
//! human-like scrolling before extraction. Slower than the direct tier but
//! survives script-based bot detection.

#![allow(dead_code)]

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};

#[cfg(feature = "browser")]
use async_trait::async_trait;
#[cfg(feature = "browser")]
use rand::Rng;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;

#[cfg(feature = "browser")]
use super::extract;
#[cfg(feature = "browser")]
use super::fingerprint::{stealth_script, Fingerprint, FingerprintGenerator};
#[cfg(feature = "browser")]
use super::proxy::ProxyPool;
#[cfg(feature = "browser")]
use super::{AcquireError, AcquisitionTier};
#[cfg(feature = "browser")]
use crate::models::{AcquisitionJob, JobKind, RawPayload};

/// Browser tier configuration.
#[derive(Debug, Clone)]
pub struct BrowserTierConfig {
    /// Run headless (disable for debugging).
    pub headless: bool,
    /// Navigation timeout.
    pub navigation_timeout: std::time::Duration,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
}

impl Default for BrowserTierConfig {
    fn default() -> Self {
        Self {
            headless: true,
            navigation_timeout: std::time::Duration::from_secs(60),
            chrome_args: Vec::new(),
        }
    }
}

/// Browser-based acquisition with stealth patches.
#[cfg(feature = "browser")]
pub struct RenderedBrowserTier {
    config: BrowserTierConfig,
    browser: Option<Browser>,
    /// Proxy address the current browser was launched with.
    current_proxy: Option<String>,
    fingerprints: FingerprintGenerator,
    proxies: Arc<Mutex<ProxyPool>>,
}

#[cfg(feature = "browser")]
impl RenderedBrowserTier {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: BrowserTierConfig, proxies: Arc<Mutex<ProxyPool>>) -> Self {
        Self {
            config,
            browser: None,
            current_proxy: None,
            fingerprints: FingerprintGenerator::new(),
            proxies,
        }
    }

    /// Find a Chrome executable.
    fn find_chrome() -> Result<std::path::PathBuf, AcquireError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(AcquireError::Browser(
            "Chrome/Chromium not found in common locations or PATH".to_string(),
        ))
    }

    /// Launch the browser if not already running.
    ///
    /// Proxy selection happens here: one egress endpoint per browser
    /// lifetime, rotated on recycle.
    async fn ensure_browser(&mut self) -> Result<(), AcquireError> {
        if self.browser.is_some() {
            return Ok(());
        }

        let chrome_path = Self::find_chrome()?;
        let proxy = self.proxies.lock().await.next();

        info!(
            "Launching browser (headless={}, proxy={})",
            self.config.headless,
            proxy.as_ref().map(|p| p.address.as_str()).unwrap_or("none")
        );

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless, confusingly
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref endpoint) = proxy {
            builder = builder.arg(format!("--proxy-server={}", endpoint.address));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| AcquireError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AcquireError::Browser(format!("Failed to launch browser: {}", e)))?;

        // Drive the CDP event stream until the browser goes away
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        self.current_proxy = proxy.map(|p| p.address);

        Ok(())
    }

    /// Tear the browser down so the next attempt relaunches fresh.
    async fn teardown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        self.current_proxy = None;
    }

    /// Target URL for a job.
    fn target_url(job: &AcquisitionJob) -> String {
        match job.kind {
            JobKind::Trending => {
                "https://www.tiktok.com/search?q=tiktokmademebuyit".to_string()
            }
            JobKind::Category => {
                let category = job.target_category.as_deref().unwrap_or("achados");
                format!(
                    "https://www.tiktok.com/search?q={}",
                    urlencoding::encode(category)
                )
            }
            JobKind::RefreshBatch => {
                "https://www.tiktok.com/search?q=achados%20tiktok".to_string()
            }
        }
    }

    /// Navigate, scroll, and extract within one page.
    ///
    /// The caller owns page closing, so every early return here still
    /// releases the tab.
    async fn drive_page(
        &self,
        page: &Page,
        job: &AcquisitionJob,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<RawPayload>, AcquireError> {
        // Identity overrides must land before any navigation
        page.execute(SetUserAgentOverrideParams::new(
            fingerprint.user_agent.clone(),
        ))
        .await
        .map_err(|e| AcquireError::Browser(e.to_string()))?;

        let _ = page
            .execute(SetTimezoneOverrideParams::new(fingerprint.timezone.clone()))
            .await;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(
            fingerprint,
        )))
        .await
        .map_err(|e| AcquireError::Browser(e.to_string()))?;

        let url = Self::target_url(job);
        info!("Navigating to {}", url);

        let nav_params = NavigateParams::builder()
            .url(url.clone())
            .build()
            .map_err(|e| AcquireError::Browser(format!("Invalid URL: {}", e)))?;

        tokio::time::timeout(self.config.navigation_timeout, page.execute(nav_params))
            .await
            .map_err(|_| AcquireError::Timeout)?
            .map_err(|e| AcquireError::Network(e.to_string()))?;

        self.wait_for_ready(page).await;

        // Check for a block page before investing in scroll simulation
        let content = page
            .content()
            .await
            .map_err(|e| AcquireError::Browser(e.to_string()))?;
        if let Some(signature) = extract::detect_block_page(&content) {
            return Err(AcquireError::Detection(signature.to_string()));
        }

        self.simulate_scrolling(page, fingerprint).await;

        let content = page
            .content()
            .await
            .map_err(|e| AcquireError::Browser(e.to_string()))?;
        if let Some(signature) = extract::detect_block_page(&content) {
            return Err(AcquireError::Detection(signature.to_string()));
        }

        Ok(Self::extract_payloads(&content, job))
    }

    /// Wait for document readiness, bounded by the navigation timeout.
    async fn wait_for_ready(&self, page: &Page) {
        let ready_script = r#"
            new Promise((resolve) => {
                if (document.readyState === 'complete' || document.readyState === 'interactive') {
                    resolve(document.readyState);
                } else {
                    document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                    setTimeout(() => resolve('timeout'), 10000);
                }
            })
        "#;

        match tokio::time::timeout(
            self.config.navigation_timeout,
            page.evaluate(ready_script.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    /// Staged scrolling with randomized pauses.
    ///
    /// Scroll depth scales with the viewport so small screens do not jump
    /// implausibly far; a partial scroll-back at the end mimics a reader.
    async fn simulate_scrolling(&self, page: &Page, fingerprint: &Fingerprint) {
        let height = fingerprint.viewport.height as f64;
        let positions = [
            height * 0.3,
            height * 0.6,
            height * 1.0,
            height * 1.5,
            height * 2.2,
        ];

        for position in positions {
            let script = format!("window.scrollTo(0, {:.0})", position);
            if page.evaluate(script).await.is_err() {
                break;
            }
            let pause = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(300..900))
            };
            tokio::time::sleep(pause).await;
        }

        let _ = page
            .evaluate(format!("window.scrollTo(0, {:.0})", height * 0.5))
            .await;
        let settle = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(200..500))
        };
        tokio::time::sleep(settle).await;
    }

    /// Extraction priority: embedded state, then DOM cards, then bare links.
    fn extract_payloads(content: &str, job: &AcquisitionJob) -> Vec<RawPayload> {
        let embedded = extract::extract_embedded_products(content);
        if !embedded.is_empty() {
            return embedded.into_iter().map(RawPayload::EmbeddedState).collect();
        }

        let fragments = extract::extract_dom_products(content);
        if !fragments.is_empty() {
            return fragments.into_iter().map(RawPayload::Dom).collect();
        }

        extract::extract_item_links(content)
            .into_iter()
            .map(|(id, url)| {
                RawPayload::EmbeddedState(serde_json::json!({
                    "id": id,
                    "title": format!("Trending item {}", id),
                    "url": url,
                    "isTrending": job.kind == JobKind::Trending,
                }))
            })
            .collect()
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl AcquisitionTier for RenderedBrowserTier {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn acquire(&mut self, job: &AcquisitionJob) -> Result<Vec<RawPayload>, AcquireError> {
        self.ensure_browser().await?;
        let fingerprint = self.fingerprints.generate();
        debug!("Using fingerprint {}", fingerprint.hash);

        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| AcquireError::Browser("browser not running".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AcquireError::Browser(e.to_string()))?;

        let started = Instant::now();
        let result = self.drive_page(&page, job, &fingerprint).await;

        // Close the tab on every path to prevent accumulation
        let _ = page.close().await;

        // Feed the proxy pool's health stats
        if let Some(address) = self.current_proxy.clone() {
            let mut pool = self.proxies.lock().await;
            match &result {
                Ok(_) => {
                    pool.report_success(&address, started.elapsed().as_millis() as f64)
                }
                Err(_) => pool.report_failure(&address, None),
            }
        }

        let mut payloads = result?;
        payloads.truncate(job.limit);
        Ok(payloads)
    }

    async fn recycle(&mut self) {
        info!("Recycling browser tier");
        self.teardown().await;
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct RenderedBrowserTier;

#[cfg(feature = "browser")]
#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind, category: Option<&str>) -> AcquisitionJob {
        AcquisitionJob::new(kind, category.map(str::to_string), 20)
    }

    #[test]
    fn test_target_url_per_kind() {
        let url = RenderedBrowserTier::target_url(&job(JobKind::Trending, None));
        assert!(url.contains("tiktokmademebuyit"));

        let url = RenderedBrowserTier::target_url(&job(JobKind::Category, Some("moda feminina")));
        assert!(url.contains("moda%20feminina"));
    }

    #[test]
    fn test_extract_payloads_prefers_embedded_state() {
        let html = r#"
            <script>window.__INITIAL_STATE__ = {"products": [{"id": "7"}]};</script>
            <div class="product-card"><h3>DOM card</h3></div>
        "#;
        let payloads =
            RenderedBrowserTier::extract_payloads(html, &job(JobKind::Trending, None));
        assert_eq!(payloads.len(), 1);
        assert!(matches!(payloads[0], RawPayload::EmbeddedState(_)));
    }

    #[test]
    fn test_extract_payloads_falls_back_to_links() {
        let html = r#"<a href="/@shop/video/42">item</a>"#;
        let payloads =
            RenderedBrowserTier::extract_payloads(html, &job(JobKind::Trending, None));
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            RawPayload::EmbeddedState(v) => {
                assert_eq!(v["id"], "42");
                assert_eq!(v["isTrending"], true);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
