//! Session proxy generator
//!
//! Thread-safe proxy URL generator with unique session IDs. Each call
//! to `next()` yields a URL with a fresh sessid, which makes the
//! upstream hand out a different exit IP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use urlencoding::encode;

use super::ProxyConfig;

/// Global atomic counter for unique session IDs
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct SessionProxyGenerator {
    config: ProxyConfig,
    /// Base seed for session ID generation
    base_seed: u64,
}

/// Credentials for one generated session, split out for callers that
/// need the pieces separately (the forwarder authenticates upstream
/// itself rather than embedding credentials in a URL).
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub session_id: u64,
}

impl SessionProxyGenerator {
    pub fn new(config: ProxyConfig) -> Self {
        // Seed from timestamp and pid so concurrent processes never collide
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let pid = std::process::id() as u64;
        let base_seed = (timestamp % 1_000_000) * 1_000_000 + (pid % 1_000_000);

        debug!(
            "SessionProxyGenerator initialized: customer={}, country={}, base_seed={}",
            config.customer, config.country, base_seed
        );

        Self { config, base_seed }
    }

    fn allocate_sessid(&self) -> u64 {
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.base_seed + counter
    }

    fn build_username(&self, sessid: u64) -> String {
        format!(
            "customer-{}-cc-{}-sessid-{}-sesstime-{}",
            self.config.customer, self.config.country, sessid, self.config.sesstime
        )
    }

    /// Generate the next unique proxy URL.
    ///
    /// Format: `{scheme}://{username}:{password}@{host}:{port}`
    pub fn next(&self) -> String {
        let sessid = self.allocate_sessid();
        let username = self.build_username(sessid);
        let password_encoded = encode(&self.config.password);

        let proxy_url = format!(
            "{}://{}:{}@{}:{}",
            self.config.scheme, username, password_encoded, self.config.host, self.config.port
        );

        debug!("Generated proxy URL with sessid={}", sessid);
        proxy_url
    }

    /// Generate the next session as separate credential fields.
    pub fn next_credentials(&self) -> SessionCredentials {
        let sessid = self.allocate_sessid();
        SessionCredentials {
            username: self.build_username(sessid),
            password: self.config.password.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            session_id: sessid,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_generation() {
        let config = ProxyConfig::new("testcustomer", "testpassword123").with_country("us");
        let generator = SessionProxyGenerator::new(config);

        let url1 = generator.next();
        let url2 = generator.next();

        // Different session IDs mean different URLs
        assert_ne!(url1, url2);

        assert!(url1.contains("customer-testcustomer"));
        assert!(url1.contains("cc-us"));
        assert!(url1.contains("sessid-"));
        assert!(url1.contains("sesstime-10"));
    }

    #[test]
    fn test_password_is_url_encoded() {
        let config = ProxyConfig::new("cust", "p@ss w0rd");
        let generator = SessionProxyGenerator::new(config);
        let url = generator.next();
        assert!(url.contains("p%40ss%20w0rd"));
    }

    #[test]
    fn test_unique_session_ids() {
        let config = ProxyConfig::new("test", "pass");
        let generator = SessionProxyGenerator::new(config);

        let mut session_ids: Vec<u64> = Vec::new();
        for _ in 0..100 {
            session_ids.push(generator.next_credentials().session_id);
        }

        let unique_count = session_ids
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        assert_eq!(unique_count, 100);
    }
}
