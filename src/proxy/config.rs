//! Proxy configuration

/// Default Oxylabs proxy host
pub const DEFAULT_HOST: &str = "pr.oxylabs.io";
/// Default port for HTTP proxy (more reliable for browsers with auth)
pub const DEFAULT_PORT: u16 = 60000;
/// Default session time in minutes
pub const DEFAULT_SESSTIME: u16 = 10;

/// Credentials and routing parameters for the upstream rotating proxy.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProxyConfig {
    /// Customer ID
    pub customer: String,
    /// Proxy password
    pub password: String,
    /// Proxy host (default: pr.oxylabs.io)
    pub host: String,
    /// Proxy port (default: 60000)
    pub port: u16,
    /// Country code for the exit IP
    pub country: String,
    /// Session time in minutes (default: 10)
    pub sesstime: u16,
    /// Proxy scheme (http, https, socks5, socks5h)
    pub scheme: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        // HTTP mode works everywhere CONNECT does and keeps auth simple
        let scheme = std::env::var("PROXY_SCHEME").unwrap_or_else(|_| "http".to_string());

        Self {
            customer: String::new(),
            password: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            country: "us".to_string(),
            sesstime: DEFAULT_SESSTIME,
            scheme,
        }
    }
}

impl ProxyConfig {
    pub fn new(customer: &str, password: &str) -> Self {
        Self {
            customer: customer.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    /// Set the country code
    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_lowercase();
        self
    }

    /// Set the session time in minutes
    pub fn with_sesstime(mut self, minutes: u16) -> Self {
        self.sesstime = minutes;
        self
    }

    /// Set the proxy scheme
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_lowercase();
        self
    }

    /// Check if credentials are present
    pub fn is_configured(&self) -> bool {
        !self.customer.is_empty() && !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_by_default() {
        assert!(!ProxyConfig::default().is_configured());
        assert!(ProxyConfig::new("cust", "pw").is_configured());
    }

    #[test]
    fn test_country_is_lowercased() {
        let config = ProxyConfig::new("c", "p").with_country("DE");
        assert_eq!(config.country, "de");
    }
}
