//! Claim a key for one offer with one account.
//!
//! ```sh
//! OFFER_URL=https://example.com/ucf/Giveaway/cool-game \
//! CLAIM_EMAIL=me@example.com CLAIM_PASSWORD=secret \
//! cargo run --example claim_offer
//! ```
//!
//! Set PROXY_CUSTOMER / PROXY_PASSWORD (and optionally PROXY_COUNTRY) to
//! route the browser through the rotating proxy and enable IP rotation.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use arena_claimer::claimer::Claimer;
use arena_claimer::proxy::{
    ForwarderRotator, LocalProxyForwarder, ProxyConfig, SessionProxyGenerator,
};
use arena_claimer::signals::Signals;
use arena_claimer::{init_logging, ClaimerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logging();

    let offer_url = std::env::var("OFFER_URL").context("OFFER_URL is required")?;
    let email = std::env::var("CLAIM_EMAIL").context("CLAIM_EMAIL is required")?;
    let password = std::env::var("CLAIM_PASSWORD").context("CLAIM_PASSWORD is required")?;

    let (signals, mut log_rx, mut key_rx) = Signals::channel();

    tokio::spawn(async move {
        while let Some(message) = log_rx.recv().await {
            println!("{}", message);
        }
    });
    tokio::spawn(async move {
        while let Some(found) = key_rx.recv().await {
            println!("== {} claimed {} ==", found.email, found.key);
        }
    });

    let config = ClaimerConfig::load();
    let mut claimer = Claimer::new(&offer_url, signals, config);

    // Optional rotating proxy
    let proxy_config = proxy_config_from_env();
    let forwarder = if proxy_config.is_configured() {
        let generator = SessionProxyGenerator::new(proxy_config);
        let local_proxy = Arc::new(LocalProxyForwarder::with_auto_port(
            &generator.next_credentials(),
        ));
        local_proxy.start().await.context("starting local proxy")?;

        match arena_claimer::proxy::verify_proxy(&local_proxy.local_url()).await {
            Ok(true) => println!("Proxy verified: egress IP differs from the direct IP"),
            Ok(false) => println!("Warning: proxy reachable but not changing the egress IP"),
            Err(e) => println!("Warning: proxy verification failed: {}", e),
        }

        let rotator = ForwarderRotator::new(local_proxy.clone(), generator);
        claimer = claimer
            .with_proxy(Some(rotator.local_proxy_url()))
            .with_rotator(Arc::new(rotator));
        Some(local_proxy)
    } else {
        None
    };

    let key = claimer.claim_key(&email, &password).await;

    if let Some(local_proxy) = &forwarder {
        local_proxy.stop();
    }

    match key {
        Some(key) => {
            println!("Claimed key: {}", key);
            if let Some(path) = claimer.export_all_keys(None) {
                println!("Exported to {}", path.display());
            }
            Ok(())
        }
        None => bail!("no key claimed"),
    }
}

fn proxy_config_from_env() -> ProxyConfig {
    let customer = std::env::var("PROXY_CUSTOMER").unwrap_or_default();
    let password = std::env::var("PROXY_PASSWORD").unwrap_or_default();
    let mut config = ProxyConfig::new(&customer, &password);
    if let Ok(country) = std::env::var("PROXY_COUNTRY") {
        config = config.with_country(&country);
    }
    config
}
