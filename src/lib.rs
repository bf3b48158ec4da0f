//! Arena Claimer
//!
//! Automated key claiming for giveaway pages: logs an account in through a
//! real Chrome session, triggers the "Get Key" flow with layered selector
//! fallbacks, extracts the issued key from the page, and rotates the egress
//! IP when the site reports that no key is available.

pub mod browser;
pub mod claimer;
pub mod offer;
pub mod proxy;
pub mod signals;
pub mod storage;

use std::path::PathBuf;
use tracing::{error, info, warn};

/// Claimer configuration.
///
/// Timing constants mirror the site's observed behavior: four attempts per
/// procedure, a 60 second ceiling on any single wait, and short pauses
/// between attempts so the page has time to settle.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimerConfig {
    /// Attempts per procedure (login attempts, claim-loop iterations)
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Upper bound for any single wait-for-condition, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long to wait for the post-submit redirect after login, in ms
    #[serde(default = "default_login_settle_ms")]
    pub login_settle_ms: u64,
    /// Pause between failed login attempts, in ms
    #[serde(default = "default_attempt_pause_ms")]
    pub attempt_pause_ms: u64,
    /// Pause between claim-loop iterations, in ms
    #[serde(default = "default_claim_pause_ms")]
    pub claim_pause_ms: u64,

    /// Run Chrome headless
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Explicit Chrome/Chromium path (auto-detected when absent)
    #[serde(default)]
    pub chrome_path: Option<String>,

    /// Directory for the per-offer claim logs and CSV exports
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_max_retry() -> u32 { 4 }
fn default_timeout_secs() -> u64 { 60 }
fn default_login_settle_ms() -> u64 { 3000 }
fn default_attempt_pause_ms() -> u64 { 2000 }
fn default_claim_pause_ms() -> u64 { 3000 }
fn default_headless() -> bool { true }

impl Default for ClaimerConfig {
    fn default() -> Self {
        Self {
            max_retry: default_max_retry(),
            timeout_secs: default_timeout_secs(),
            login_settle_ms: default_login_settle_ms(),
            attempt_pause_ms: default_attempt_pause_ms(),
            claim_pause_ms: default_claim_pause_ms(),
            headless: default_headless(),
            chrome_path: None,
            output_dir: None,
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("arena-claimer").join("logs"))
}

impl ClaimerConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("arena-claimer").join("config.json"))
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Initialize logging: console layer plus a daily rolling file layer.
///
/// Returns the appender guard; drop it only on shutdown or buffered log
/// lines are lost.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "arena-claimer.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
