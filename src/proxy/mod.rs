//! Proxy plumbing for IP rotation
//!
//! A session generator produces authenticated upstream proxy URLs with
//! unique session IDs, a local forwarder bridges Chrome to the
//! authenticated upstream, and the rotator swaps the upstream live when
//! the claim loop asks for a fresh exit IP.

mod config;
mod forwarder;
mod generator;
mod rotator;

pub use config::ProxyConfig;
pub use forwarder::{allocate_port, LocalProxyForwarder};
pub use generator::{SessionCredentials, SessionProxyGenerator};
pub use rotator::{ForwarderRotator, IpRotator};

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy URL: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no IP in response")]
    NoIp,
}

/// Fetch the machine's public IP directly, bypassing any system proxy.
pub async fn fetch_ip_without_proxy() -> Result<String, ProxyError> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()?;

    let data: serde_json::Value = client
        .get("https://api.ipify.org/?format=json")
        .send()
        .await?
        .json()
        .await?;

    data.get("ip")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(ProxyError::NoIp)
}

/// Fetch the public IP as seen through the given proxy URL.
pub async fn fetch_ip_with_proxy(proxy_url: &str) -> Result<String, ProxyError> {
    info!("Proxy test: connecting via {}", char_prefix(proxy_url, 60));

    let proxy =
        reqwest::Proxy::all(proxy_url).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;

    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(Duration::from_secs(30))
        .build()?;

    // Plain HTTP avoids CONNECT tunnel issues during the check
    let data: serde_json::Value = client
        .get("http://api.ipify.org/?format=json")
        .send()
        .await?
        .json()
        .await?;

    data.get("ip")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(ProxyError::NoIp)
}

/// Verify that the proxy actually routes traffic: fetch the direct IP
/// and the IP seen through the proxy, and require them to differ.
pub async fn verify_proxy(proxy_url: &str) -> Result<bool, ProxyError> {
    let original_ip = fetch_ip_without_proxy().await?;
    let proxy_ip = fetch_ip_with_proxy(proxy_url).await?;
    let working = original_ip != proxy_ip;

    if working {
        info!(
            "Proxy test SUCCESS: original={}, proxy={}",
            original_ip, proxy_ip
        );
    } else {
        warn!(
            "Proxy test FAILED: IPs are the same ({}), proxy not routing",
            original_ip
        );
    }

    Ok(working)
}

/// First `max` characters of a string, never splitting a codepoint.
fn char_prefix(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_prefix_short_input_unchanged() {
        assert_eq!(char_prefix("http://short", 60), "http://short");
    }

    #[test]
    fn test_char_prefix_truncates_long_input() {
        let url = "a".repeat(100);
        assert_eq!(char_prefix(&url, 60).len(), 60);
    }

    #[test]
    fn test_char_prefix_respects_codepoint_boundaries() {
        // A multibyte char straddling the cut must not split the slice
        let url = format!("{}é-and-more", "a".repeat(59));
        let prefix = char_prefix(&url, 60);
        assert_eq!(prefix.chars().count(), 60);
        assert!(prefix.ends_with('é'));
    }
}
