//! Single shared browser session.
//!
//! Uses chromiumoxide (CDP) with the same stealth launch arguments the
//! upstream anti-bot deployments need. There is at most one live session
//! per process; all navigation goes through [`SessionManager::lease`],
//! which serializes page access across concurrent keyword workers.

mod cookies;
mod login;

pub use cookies::SessionStore;
pub use login::{LoginAutomaton, LoginFailure, LoginProbe, LoginState, PollVerdict};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Default user agent for browser requests.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// The session was closed or never launched.
#[derive(Debug, Error)]
#[error("browser session is not available")]
pub struct SessionUnavailable;

/// Session launch parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub page_timeout: Duration,
    pub chrome_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            page_timeout: Duration::from_secs(30),
            chrome_args: Vec::new(),
        }
    }
}

struct LiveSession {
    browser: Browser,
    page: Page,
}

/// Owner of the one live browser session.
pub struct SessionManager {
    config: SessionConfig,
    inner: Mutex<Option<LiveSession>>,
    ready: AtomicBool,
}

/// Exclusive lease on the live session. Holding the lease serializes all
/// navigation; keyword workers keep it for the duration of one extraction
/// call.
pub struct SessionLease<'a> {
    guard: MutexGuard<'a, Option<LiveSession>>,
    page_timeout: Duration,
}

impl SessionManager {
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
        // Common install locations
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    /// Find Chrome executable.
    fn find_chrome() -> Result<std::path::PathBuf> {
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

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Please install it:\n\
             - Arch/Manjaro: sudo pacman -S chromium\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Or download from: https://www.google.com/chrome/"
        ))
    }

    /// Launch the browser if not already running.
    pub async fn ensure(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Ok(());
        }

        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless, confusingly
        if !self.config.headless {
            builder = builder.with_head();
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
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .arg("--window-size=1920,1080")
            .arg("--no-sandbox") // Often needed for headless in containers/restricted environments
            .arg("--disable-gpu") // Recommended for headless
            .arg("--disable-software-rasterizer");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        // Spawn handler task
        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open initial page")?;

        // Set a realistic user agent before any navigation
        page.execute(SetUserAgentOverrideParams::new(
            BROWSER_USER_AGENT.to_string(),
        ))
        .await
        .context("Failed to override user agent")?;

        *inner = Some(LiveSession { browser, page });
        self.ready.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Take the exclusive session lease. Fails fast when the browser was
    /// never launched or has been closed.
    pub async fn lease(&self) -> Result<SessionLease<'_>> {
        let guard = self.inner.lock().await;
        if guard.is_none() {
            return Err(SessionUnavailable.into());
        }
        Ok(SessionLease {
            guard,
            page_timeout: self.config.page_timeout,
        })
    }

    /// Liveness flag for status reporting. Never blocks on the session
    /// lock, so a long-held lease does not stall health responses.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Close the browser. Subsequent leases fail with
    /// [`SessionUnavailable`].
    pub async fn close(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if let Some(mut live) = inner.take() {
            if let Err(e) = live.browser.close().await {
                debug!("Browser close failed: {}", e);
            }
            let _ = live.browser.wait().await;
            info!("Browser session closed");
        }
    }
}

impl SessionLease<'_> {
    /// The single shared page. The lease guarantees it exists.
    pub fn page(&self) -> &Page {
        &self
            .guard
            .as_ref()
            .expect("lease invariant: session present")
            .page
    }

    pub fn browser(&self) -> &Browser {
        &self
            .guard
            .as_ref()
            .expect("lease invariant: session present")
            .browser
    }

    /// Navigate the shared page with the configured timeout, then wait for
    /// a minimal readiness condition.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        info!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;

        tokio::time::timeout(self.page_timeout, self.page().execute(nav_params))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Navigation timed out after {}s for {}",
                    self.page_timeout.as_secs(),
                    url
                )
            })?
            .map_err(|e| anyhow::anyhow!("Navigation failed for {}: {}", url, e))?;

        self.wait_for_ready().await;
        Ok(())
    }

    /// Wait for the page to reach a ready state.
    async fn wait_for_ready(&self) {
        match tokio::time::timeout(
            self.page_timeout,
            self.page().evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
        )
        .await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => {
                debug!("Could not check ready state: {}", e);
            }
            Err(_) => {
                warn!("Timeout waiting for page ready state");
            }
        }
    }
}
