//! IP rotation
//!
//! The claim loop only needs "give me a different exit IP"; the trait
//! hides whether that happens through a forwarder upstream swap or
//! something else entirely.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{LocalProxyForwarder, SessionProxyGenerator};

/// A collaborator that can change the exit IP of subsequent browser
/// traffic. Returns whether the rotation took effect.
#[async_trait]
pub trait IpRotator: Send + Sync {
    async fn rotate_ip(&self) -> bool;
}

/// Rotates by swapping the forwarder's upstream to a freshly generated
/// proxy session. The browser keeps pointing at the same local port.
pub struct ForwarderRotator {
    forwarder: Arc<LocalProxyForwarder>,
    generator: SessionProxyGenerator,
}

impl ForwarderRotator {
    pub fn new(forwarder: Arc<LocalProxyForwarder>, generator: SessionProxyGenerator) -> Self {
        Self {
            forwarder,
            generator,
        }
    }

    /// Proxy URL the browser should use.
    pub fn local_proxy_url(&self) -> String {
        self.forwarder.local_url()
    }
}

#[async_trait]
impl IpRotator for ForwarderRotator {
    async fn rotate_ip(&self) -> bool {
        if !self.generator.is_configured() {
            warn!("Rotation requested without proxy credentials");
            return false;
        }
        if !self.forwarder.is_running() {
            warn!("Rotation requested while forwarder is stopped");
            return false;
        }

        let credentials = self.generator.next_credentials();
        info!("Rotating exit IP via sessid {}", credentials.session_id);
        self.forwarder.set_upstream(&credentials);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyConfig;

    #[tokio::test]
    async fn test_rotation_requires_running_forwarder() {
        let generator = SessionProxyGenerator::new(ProxyConfig::new("cust", "pw"));
        let forwarder = Arc::new(LocalProxyForwarder::with_auto_port(
            &generator.next_credentials(),
        ));
        let rotator = ForwarderRotator::new(forwarder.clone(), generator);

        // Not started yet
        assert!(!rotator.rotate_ip().await);

        forwarder.start().await.unwrap();
        assert!(rotator.rotate_ip().await);
        forwarder.stop();
    }

    #[tokio::test]
    async fn test_rotation_requires_credentials() {
        let generator = SessionProxyGenerator::new(ProxyConfig::default());
        let forwarder = Arc::new(LocalProxyForwarder::with_auto_port(
            &generator.next_credentials(),
        ));
        let rotator = ForwarderRotator::new(forwarder, generator);
        assert!(!rotator.rotate_ip().await);
    }
}
