//! Page-level operation surface
//!
//! The claim flow only ever drives a page through these operations, so
//! they live behind a trait. `BrowserSession` is the production
//! implementation; tests drive the flow with scripted stand-ins.

use std::time::Duration;

use async_trait::async_trait;

use super::BrowserError;

/// Operations the login and claim procedures perform on a live page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL and wait for the load to settle
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait for an in-flight navigation to complete
    async fn wait_for_navigation(&self) -> Result<(), BrowserError>;

    /// Execute JavaScript and return its value
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// Poll a boolean JavaScript condition until it holds or the deadline
    /// passes
    async fn wait_for_script(
        &self,
        condition: &str,
        timeout: Duration,
    ) -> Result<bool, BrowserError>;

    /// Current page URL
    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Full page HTML
    async fn page_source(&self) -> Result<String, BrowserError>;

    /// Click an element by CSS selector
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Fill an input by CSS selector
    async fn fill_field(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Reload the current page
    async fn refresh(&self) -> Result<(), BrowserError>;

    /// Clear local and session storage
    async fn clear_storage(&self) -> Result<(), BrowserError>;
}
