//! Browser session management
//!
//! Launches and controls a single Chrome instance over the DevTools
//! protocol. The session is an exclusively-owned scoped resource: the
//! claimer acquires it at the start of an attempt and closes it on every
//! exit path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{BrowserError, PageDriver};

/// Global counter for sequential session naming (Claimer-1, Claimer-2, ...)
static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(
                r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            ),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(std::path::PathBuf::from(format!(
                r"{}\Google\Chrome\Application\chrome.exe",
                local
            )));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![std::path::PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSessionConfig {
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// User data directory
    pub user_data_dir: Option<String>,
    /// Proxy URL (no inline auth; point Chrome at a local forwarder for
    /// authenticated upstreams)
    pub proxy: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            user_data_dir: None,
            proxy: None,
            timeout_secs: 60,
            window_width: 1920,
            window_height: 1080,
        }
    }
}

impl BrowserSessionConfig {
    /// Create config with a fresh throwaway data directory
    pub fn for_claim() -> Self {
        let base = std::env::temp_dir()
            .join("arena-claimer")
            .join("browser_data");
        let user_data_dir = base
            .join(uuid::Uuid::new_v4().to_string())
            .to_string_lossy()
            .to_string();

        Self {
            user_data_dir: Some(user_data_dir),
            ..Default::default()
        }
    }

    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set proxy
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Set Chrome path
    pub fn chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }

    /// Set timeout
    pub fn timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// A browser session for automation
pub struct BrowserSession {
    /// Display name, e.g. "Claimer-1"
    pub id: String,
    /// The browser instance; taken on close
    browser: Option<Browser>,
    /// Main page
    page: Option<Page>,
    /// Whether Chrome is still connected
    alive: Arc<AtomicBool>,
    config: BrowserSessionConfig,
}

impl BrowserSession {
    /// Launch Chrome with the given config
    pub async fn launch(config: BrowserSessionConfig) -> Result<Self, BrowserError> {
        let session_id = format!("Claimer-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));

        info!(
            "Launching browser session {} (headless: {})",
            session_id, config.headless
        );

        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome not found. Install Chrome or Chromium and retry.".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder();

        if config.headless {
            // Modern Chrome requires --headless=new for proper headless
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        if let Some(ref dir) = config.user_data_dir {
            let _ = std::fs::create_dir_all(dir);
            builder = builder.user_data_dir(dir);
        }

        builder = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            // Keep navigator.webdriver false at the engine level
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-notifications");

        if let Some(ref proxy) = config.proxy {
            info!("Session {} using proxy: {}", session_id, proxy);
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder.window_size(config.window_width, config.window_height);

        let browser_config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Drive the CDP event stream; when it ends, Chrome has disconnected
        let session_id_clone = session_id.clone();
        let alive_flag = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive_flag.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Session {} handler error: {}", session_id_clone, e);
                }
            }
            warn!(
                "Session {} Chrome disconnected (event handler ended)",
                session_id_clone
            );
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Chrome opens with a blank tab; take it as the main page and close
        // any extras
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }

            main_page
        };

        info!("Browser session {} created", session_id);

        Ok(Self {
            id: session_id,
            browser: Some(browser),
            page: Some(page),
            alive: alive_flag,
            config,
        })
    }

    /// Check if the session is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Session timeout ceiling, in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.config.timeout_secs
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::ConnectionLost("No active page".into()))
    }

    /// Navigate to a URL and wait for the load to settle
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page()?;

        debug!("Session {} navigating to: {}", self.id, url);
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        self.wait_for_navigation().await
    }

    /// Wait for an in-flight navigation to complete, bounded by the session
    /// timeout
    pub async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        let page = self.page()?;

        tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            page.wait_for_navigation(),
        )
        .await
        .map_err(|_| BrowserError::Timeout("Navigation timeout".into()))?
        .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    /// Execute JavaScript on the page with the session's default timeout
    pub async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.execute_js_with_timeout(script, self.config.timeout_secs)
            .await
    }

    /// Execute JavaScript on the page with a custom timeout (in seconds)
    pub async fn execute_js_with_timeout(
        &self,
        script: &str,
        timeout_secs: u64,
    ) -> Result<serde_json::Value, BrowserError> {
        let page = self.page()?;

        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            page.evaluate(script),
        )
        .await
        .map_err(|_| {
            BrowserError::Timeout(format!(
                "JavaScript execution timed out after {}s",
                timeout_secs
            ))
        })?
        .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Poll a boolean JavaScript condition until it holds or the deadline
    /// passes. Returns whether the condition was observed.
    pub async fn wait_for_script(
        &self,
        condition: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = Duration::from_millis(500);

        loop {
            let result = self.execute_js_with_timeout(condition, 10).await?;
            if result.as_bool() == Some(true) {
                return Ok(true);
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Ok(false);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Get current URL
    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page()?;

        page.url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("No URL".into()))
    }

    /// Get the full page HTML
    pub async fn page_source(&self) -> Result<String, BrowserError> {
        let page = self.page()?;

        page.content()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))
    }

    /// Click on an element by CSS selector
    pub async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let page = self.page()?;

        let element = page
            .find_element(selector)
            .await
            .map_err(|e| BrowserError::ElementNotFound(format!("{}: {}", selector, e)))?;

        element
            .click()
            .await
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(())
    }

    /// Fill a field by CSS selector, typing character by character with
    /// jittered delays. The text travels base64-encoded so arbitrary
    /// credentials survive embedding in the script.
    pub async fn fill_field(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let b64_text = base64::engine::general_purpose::STANDARD.encode(text);
        let script = format!(
            r#"
            (async function() {{
                const input = document.querySelector('{}');
                if (!input) return false;

                input.focus();
                input.click();
                input.value = '';

                await new Promise(r => setTimeout(r, 100 + Math.random() * 100));

                const b64 = "{}";
                const text = new TextDecoder().decode(Uint8Array.from(atob(b64), c => c.charCodeAt(0)));

                for (let i = 0; i < text.length; i++) {{
                    await new Promise(r => setTimeout(r, 30 + Math.random() * 70));
                    input.value += text[i];
                    input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                }}
                input.dispatchEvent(new Event('change', {{ bubbles: true }}));

                return true;
            }})()
            "#,
            selector.replace('\'', "\\'"),
            b64_text
        );

        let filled = self.execute_js(&script).await?;
        if filled.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    /// Reload the current page
    pub async fn refresh(&self) -> Result<(), BrowserError> {
        let page = self.page()?;

        page.reload()
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    /// Clear local and session storage. Access can throw on opaque pages;
    /// both stores are attempted regardless.
    pub async fn clear_storage(&self) -> Result<(), BrowserError> {
        self.execute_js(
            r#"
            (function() {
                try { window.localStorage.clear(); } catch (e) {}
                try { window.sessionStorage.clear(); } catch (e) {}
                return true;
            })()
            "#,
        )
        .await?;
        Ok(())
    }

    /// Close the browser session
    pub async fn close(&mut self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::Relaxed);

        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }

        if let Some(mut browser) = self.browser.take() {
            // Graceful close first, then force kill so no Chrome processes
            // linger
            let _ = browser.close().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = browser.kill().await;
        }

        info!("Browser session {} closed", self.id);
        Ok(())
    }
}

#[async_trait]
impl PageDriver for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        BrowserSession::navigate(self, url).await
    }

    async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
        BrowserSession::wait_for_navigation(self).await
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        BrowserSession::execute_js(self, script).await
    }

    async fn wait_for_script(
        &self,
        condition: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError> {
        BrowserSession::wait_for_script(self, condition, timeout).await
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        BrowserSession::current_url(self).await
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        BrowserSession::page_source(self).await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        BrowserSession::click(self, selector).await
    }

    async fn fill_field(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        BrowserSession::fill_field(self, selector, text).await
    }

    async fn refresh(&self) -> Result<(), BrowserError> {
        BrowserSession::refresh(self).await
    }

    async fn clear_storage(&self) -> Result<(), BrowserError> {
        BrowserSession::clear_storage(self).await
    }
}
