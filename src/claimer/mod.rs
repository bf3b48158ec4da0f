//! Claim orchestration
//!
//! The `Claimer` owns everything a claim run needs: the offer identity,
//! the claimed-email set, the result list, the notification sink and an
//! optional IP-rotation collaborator. One browser session per
//! `claim_key` call, torn down on every exit path.

mod availability;
mod extract;
mod login;
mod strategies;

pub use availability::{source_reports_unavailable, UNAVAILABLE_PHRASES};
pub use extract::extract_key_from_source;
pub use login::LoginOutcome;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserSession, BrowserSessionConfig, PageDriver};
use crate::offer::Offer;
use crate::proxy::IpRotator;
use crate::signals::Signals;
use crate::storage::{ClaimResult, ClaimStore};
use crate::ClaimerConfig;

/// Unavailability failures tolerated before the rotator is invoked
const ROTATION_THRESHOLD: u32 = 2;

/// Tracks unavailability failures between IP rotations.
#[derive(Debug)]
pub(crate) struct MitigationPolicy {
    failures: u32,
    threshold: u32,
    rotations: u32,
}

impl MitigationPolicy {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold,
            rotations: 0,
        }
    }

    /// Record one unavailability cycle.
    pub(crate) fn record_unavailable(&mut self) {
        self.failures += 1;
    }

    /// Whether enough failures accumulated to warrant a rotation.
    pub(crate) fn should_rotate(&self) -> bool {
        self.failures >= self.threshold
    }

    /// A rotation happened; start counting fresh.
    pub(crate) fn rotated(&mut self) {
        self.rotations += 1;
        self.failures = 0;
    }

    pub(crate) fn rotations(&self) -> u32 {
        self.rotations
    }
}

/// Drives a browser session through login and the claim loop for one
/// giveaway offer.
pub struct Claimer {
    offer: Offer,
    config: ClaimerConfig,
    signals: Signals,
    rotator: Option<Arc<dyn IpRotator>>,
    proxy: Option<String>,
    store: ClaimStore,
    claimed_emails: HashSet<String>,
    claimed_keys: Vec<ClaimResult>,
}

impl Claimer {
    /// Build a claimer for the offer URL. The claimed-email set is loaded
    /// from the per-offer log once, here.
    pub fn new(url: &str, signals: Signals, config: ClaimerConfig) -> Self {
        let offer = Offer::new(url);
        let output_dir = config
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let store = ClaimStore::new(output_dir, &offer.sanitized_name());
        let claimed_emails = store.load_claimed_emails();

        Self {
            offer,
            config,
            signals,
            rotator: None,
            proxy: None,
            store,
            claimed_emails,
            claimed_keys: Vec::new(),
        }
    }

    /// Attach an IP-rotation collaborator, invoked during mitigation.
    pub fn with_rotator(mut self, rotator: Arc<dyn IpRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    /// Route the browser through a proxy (typically the local forwarder
    /// paired with the rotator).
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    /// Keys claimed during this run, in claim order.
    pub fn claimed_keys(&self) -> &[ClaimResult] {
        &self.claimed_keys
    }

    /// Whether the email already holds a key for this offer.
    pub fn is_claimed(&self, email: &str) -> bool {
        self.claimed_emails.contains(email)
    }

    /// Claim a key for the given account. Returns the key on success,
    /// `None` for every failure mode; this never raises. The browser
    /// session is torn down on all paths.
    pub async fn claim_key(&mut self, email: &str, password: &str) -> Option<String> {
        if self.is_claimed(email) {
            self.signals.log(format!(
                "⏩ Skipping {} - already claimed key for this offer",
                email
            ));
            return None;
        }

        let Some(login_link) = self.offer.login_link() else {
            self.signals
                .log(format!("❌ Cannot derive login link from {}", self.offer.url()));
            return None;
        };

        let session_config = BrowserSessionConfig::for_claim()
            .headless(self.config.headless)
            .chrome_path(self.config.chrome_path.clone())
            .proxy(self.proxy.clone())
            .timeout(self.config.timeout_secs);

        let mut session = match BrowserSession::launch(session_config).await {
            Ok(session) => session,
            Err(e) => {
                self.signals
                    .log(format!("❗ Key claiming error: {}", e));
                return None;
            }
        };

        let key = match self.run_claim(&session, email, password, &login_link).await {
            Ok(key) => key,
            Err(e) => {
                // Any unexpected fault resolves to "no key claimed"
                self.signals.log(format!("❗ Key claiming error: {}", e));
                None
            }
        };

        if let Err(e) = session.close().await {
            warn!("Session teardown error: {}", e);
        }

        key
    }

    async fn run_claim(
        &mut self,
        session: &dyn PageDriver,
        email: &str,
        password: &str,
        login_link: &str,
    ) -> Result<Option<String>, BrowserError> {
        session.navigate(login_link).await?;

        let outcome = login::perform_login(
            session,
            &self.offer,
            &self.config,
            &self.signals,
            email,
            password,
        )
        .await;

        if outcome != LoginOutcome::Success {
            self.signals
                .log("❌ Login failed after multiple attempts".to_string());
            return Ok(None);
        }

        session.navigate(self.offer.url()).await?;

        let mut mitigation = MitigationPolicy::new(ROTATION_THRESHOLD);

        for attempt in 1..=self.config.max_retry {
            self.signals
                .log(format!("🔍 Attempting to claim key (Attempt {})", attempt));

            // The page may already display a key from an earlier visit
            if let Some(key) = extract::extract_existing_key(session).await {
                self.save_key_and_email(email, &key);
                return Ok(Some(key));
            }

            if let Some(key) = self.try_claim_strategies(session).await {
                self.save_key_and_email(email, &key);
                return Ok(Some(key));
            }

            if availability::is_key_unavailable(session, &self.signals).await {
                self.signals
                    .log("🔄 Key unavailable. Attempting mitigation...".to_string());
                self.mitigate(session, &mut mitigation).await;
                continue;
            }

            tokio::time::sleep(Duration::from_millis(self.config.claim_pause_ms)).await;
        }

        self.signals
            .log("❌ Could not claim key after multiple attempts".to_string());
        Ok(None)
    }

    /// Run the trigger strategies in order; first key wins. A strategy
    /// error falls through to the next strategy.
    async fn try_claim_strategies(&self, session: &dyn PageDriver) -> Option<String> {
        let direct = strategies::direct_get_key(session).await;
        match direct {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(e) => self.signals.log(format!("❗ Strategy failed: {}", e)),
        }

        match strategies::wait_then_click_get_key(session).await {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(e) => self.signals.log(format!("❗ Strategy failed: {}", e)),
        }

        match strategies::injected_get_key(session).await {
            Ok(Some(key)) => Some(key),
            Ok(None) => None,
            Err(e) => {
                self.signals.log(format!("❗ Strategy failed: {}", e));
                None
            }
        }
    }

    /// Unavailability mitigation: rotate the IP once enough failures
    /// accumulated, then refresh and clear page storage.
    async fn mitigate(&self, session: &dyn PageDriver, mitigation: &mut MitigationPolicy) {
        mitigation.record_unavailable();

        if mitigation.should_rotate() {
            if let Some(rotator) = &self.rotator {
                self.signals.log("🌐 Rotating IP".to_string());
                if rotator.rotate_ip().await {
                    mitigation.rotated();
                } else {
                    self.signals.log("❗ IP rotation failed".to_string());
                }
            } else {
                self.signals.log("❌ No IP rotator configured".to_string());
            }
        }

        if let Err(e) = session.refresh().await {
            debug!("Mitigation refresh failed: {}", e);
        }
        if let Err(e) = session.wait_for_navigation().await {
            debug!("Mitigation reload wait failed: {}", e);
        }
        if let Err(e) = session.clear_storage().await {
            debug!("Storage clear failed: {}", e);
        }
    }

    /// Persist a claimed key: in-memory list, claimed set (effective
    /// immediately), append-only log line, then notify.
    fn save_key_and_email(&mut self, email: &str, key: &str) {
        let result = ClaimResult {
            email: email.to_string(),
            key: key.to_string(),
            offer: self.offer.name().to_string(),
        };

        self.claimed_keys.push(result.clone());
        self.claimed_emails.insert(email.to_string());

        if let Err(e) = self.store.append(&result) {
            self.signals
                .log(format!("❗ Failed to write claim log: {}", e));
        }

        self.signals
            .log(format!("💾 Saved key for {}", self.offer.name()));
        self.signals.key_found(email, key);
    }

    /// Export every key claimed this run to a CSV file. Returns the
    /// written path, or `None` when nothing was claimed or the write
    /// failed.
    pub fn export_all_keys(&self, filename: Option<PathBuf>) -> Option<PathBuf> {
        match self.store.export(&self.claimed_keys, filename) {
            Ok(path) => path,
            Err(e) => {
                self.signals.log(format!("❌ Failed to export keys: {}", e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use tempfile::tempdir;

    const OFFER_URL: &str = "https://example.com/ucf/Giveaway/test-offer";

    /// Page stand-in driven by canned responses. Login selectors resolve,
    /// the post-submit URL is the offer page, and the in-page key scan
    /// yields `keys[n]` on its n-th call (last entry repeats).
    struct ScriptedPage {
        present: Vec<&'static str>,
        landing_url: String,
        keys: Vec<Option<String>>,
        source: String,
        scans: AtomicU32,
        refreshes: AtomicU32,
        storage_clears: AtomicU32,
    }

    impl ScriptedPage {
        fn logged_in(keys: Vec<Option<String>>, source: &str) -> Self {
            Self {
                present: vec!["#_username", "#_password", "#_login"],
                landing_url: OFFER_URL.to_string(),
                keys,
                source: source.to_string(),
                scans: AtomicU32::new(0),
                refreshes: AtomicU32::new(0),
                storage_clears: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedPage {
        async fn navigate(&self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn wait_for_navigation(&self) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn execute_js(&self, script: &str) -> Result<Value, BrowserError> {
            if let Some(rest) = script.strip_prefix("!!document.querySelector('") {
                let selector = rest.trim_end_matches("')");
                return Ok(Value::Bool(self.present.contains(&selector)));
            }
            if script.contains("'p, div, span'") {
                let idx = self.scans.fetch_add(1, Ordering::SeqCst) as usize;
                let key = self
                    .keys
                    .get(idx)
                    .or_else(|| self.keys.last())
                    .and_then(|k| k.clone());
                return Ok(key.map(Value::String).unwrap_or(Value::Null));
            }
            Ok(Value::Null)
        }

        async fn wait_for_script(
            &self,
            _condition: &str,
            _timeout: Duration,
        ) -> Result<bool, BrowserError> {
            Ok(false)
        }

        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok(self.landing_url.clone())
        }

        async fn page_source(&self) -> Result<String, BrowserError> {
            Ok(self.source.clone())
        }

        async fn click(&self, _selector: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn fill_field(&self, _selector: &str, _text: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn refresh(&self) -> Result<(), BrowserError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn clear_storage(&self) -> Result<(), BrowserError> {
            self.storage_clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingRotator {
        rotations: AtomicU32,
    }

    #[async_trait]
    impl IpRotator for CountingRotator {
        async fn rotate_ip(&self) -> bool {
            self.rotations.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn test_claimer(dir: &std::path::Path) -> Claimer {
        let config = ClaimerConfig {
            output_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        Claimer::new(
            OFFER_URL,
            Signals::sink(),
            config,
        )
    }

    #[tokio::test]
    async fn test_claim_skips_known_email_without_browser_work() {
        let dir = tempdir().unwrap();
        let (signals, mut log_rx, _key_rx) = Signals::channel();
        let config = ClaimerConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut claimer = Claimer::new(
            OFFER_URL,
            signals,
            config,
        );
        claimer.claimed_emails.insert("used@example.com".to_string());

        let key = claimer.claim_key("used@example.com", "pw").await;
        assert!(key.is_none());

        let message = log_rx.recv().await.unwrap();
        assert!(message.starts_with("⏩ Skipping used@example.com"));
    }

    #[test]
    fn test_save_key_grows_set_and_log() {
        let dir = tempdir().unwrap();
        let mut claimer = test_claimer(dir.path());

        assert!(!claimer.is_claimed("a@b.c"));
        claimer.save_key_and_email("a@b.c", "ABCDE-12345");

        assert!(claimer.is_claimed("a@b.c"));
        assert_eq!(claimer.claimed_keys().len(), 1);
        assert_eq!(claimer.claimed_keys()[0].key, "ABCDE-12345");

        let log = std::fs::read_to_string(
            dir.path().join("Test Offer_claimed_keys.txt"),
        )
        .unwrap();
        assert_eq!(
            log,
            "Email: a@b.c | Key: ABCDE-12345 | Offer: Test Offer\n"
        );
    }

    #[test]
    fn test_claimed_set_survives_reconstruction() {
        let dir = tempdir().unwrap();
        {
            let mut claimer = test_claimer(dir.path());
            claimer.save_key_and_email("a@b.c", "KEY-1");
        }
        let claimer = test_claimer(dir.path());
        assert!(claimer.is_claimed("a@b.c"));
        assert!(!claimer.is_claimed("other@b.c"));
    }

    #[test]
    fn test_export_none_without_claims() {
        let dir = tempdir().unwrap();
        let claimer = test_claimer(dir.path());
        assert!(claimer.export_all_keys(None).is_none());
        assert!(!dir.path().join("Test Offer_all_keys.csv").exists());
    }

    #[test]
    fn test_export_row_count_matches_claims() {
        let dir = tempdir().unwrap();
        let mut claimer = test_claimer(dir.path());
        claimer.save_key_and_email("a@b.c", "KEY-1");
        claimer.save_key_and_email("d@e.f", "KEY-2");

        let path = claimer.export_all_keys(None).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Email,Key,Offer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_returns_existing_key_without_rotation() {
        let dir = tempdir().unwrap();
        let mut claimer = test_claimer(dir.path());
        let rotator = Arc::new(CountingRotator::default());
        claimer = claimer.with_rotator(rotator.clone());

        let page = ScriptedPage::logged_in(
            vec![Some("ABCDE-12345".to_string())],
            "<html></html>",
        );
        let login_link = claimer.offer.login_link().unwrap();

        let key = claimer
            .run_claim(&page, "a@b.c", "pw", &login_link)
            .await
            .unwrap();

        assert_eq!(key.as_deref(), Some("ABCDE-12345"));
        assert!(claimer.is_claimed("a@b.c"));
        assert_eq!(rotator.rotations.load(Ordering::SeqCst), 0);
        assert_eq!(page.refreshes.load(Ordering::SeqCst), 0);

        let log = std::fs::read_to_string(
            dir.path().join("Test Offer_claimed_keys.txt"),
        )
        .unwrap();
        assert_eq!(log, "Email: a@b.c | Key: ABCDE-12345 | Offer: Test Offer\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_rotates_once_across_two_unavailable_cycles() {
        let dir = tempdir().unwrap();
        let mut claimer = test_claimer(dir.path());
        let rotator = Arc::new(CountingRotator::default());
        claimer = claimer.with_rotator(rotator.clone());

        // Two empty scans against an exhausted page, then a key appears
        let page = ScriptedPage::logged_in(
            vec![None, None, Some("QWERT-09876".to_string())],
            "<div>No keys available</div>",
        );
        let login_link = claimer.offer.login_link().unwrap();

        let key = claimer
            .run_claim(&page, "a@b.c", "pw", &login_link)
            .await
            .unwrap();

        assert_eq!(key.as_deref(), Some("QWERT-09876"));
        assert_eq!(rotator.rotations.load(Ordering::SeqCst), 1);
        // Each unavailable cycle reloads the page and clears its storage
        assert_eq!(page.refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(page.storage_clears.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mitigation_rotates_after_second_failure() {
        let mut policy = MitigationPolicy::new(ROTATION_THRESHOLD);

        // First unavailability cycle: no rotation yet
        policy.record_unavailable();
        assert!(!policy.should_rotate());

        // Second cycle triggers exactly one rotation
        policy.record_unavailable();
        assert!(policy.should_rotate());
        policy.rotated();
        assert_eq!(policy.rotations(), 1);

        // Counter restarts after rotation
        assert!(!policy.should_rotate());
        policy.record_unavailable();
        assert!(!policy.should_rotate());
    }
}
