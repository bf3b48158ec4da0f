//! Login procedure
//!
//! The login form moves around between site revamps, so every field is
//! located through an ordered probe list; the first probe that resolves
//! wins. All interaction failures are caught and counted as a failed
//! attempt; this procedure never raises.

use std::time::Duration;

use url::Url;

use crate::browser::{BrowserError, PageDriver};
use crate::offer::Offer;
use crate::signals::Signals;
use crate::ClaimerConfig;

/// One way of finding a page element.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Probe {
    /// Plain CSS selector
    Css(&'static str),
    /// Scan buttons and submit inputs for label text
    ButtonText(&'static str),
}

const EMAIL_PROBES: &[Probe] = &[
    Probe::Css("#_username"),
    Probe::Css("input[name='username']"),
    Probe::Css("input[type='email']"),
];

const PASSWORD_PROBES: &[Probe] = &[
    Probe::Css("#_password"),
    Probe::Css("input[name='password']"),
    Probe::Css("input[type='password']"),
];

const SUBMIT_PROBES: &[Probe] = &[
    Probe::Css("#_login"),
    Probe::ButtonText("Login"),
    Probe::Css("button[type='submit']"),
];

/// How a login request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Redirected back to the offer page
    Success,
    /// All attempts exhausted
    Failed,
}

/// Try each probe in order; the first that resolves yields a CSS selector
/// usable for the follow-up interaction. `ButtonText` probes tag the
/// matched element with a one-off data attribute and return a selector
/// for it.
pub(crate) async fn locate(
    session: &dyn PageDriver,
    probes: &[Probe],
    tag: &str,
) -> Result<Option<String>, BrowserError> {
    for probe in probes {
        match probe {
            Probe::Css(selector) => {
                let script = format!(
                    "!!document.querySelector('{}')",
                    selector.replace('\'', "\\'")
                );
                if session.execute_js(&script).await?.as_bool() == Some(true) {
                    return Ok(Some((*selector).to_string()));
                }
            }
            Probe::ButtonText(text) => {
                let attr = format!("data-probe-{}", tag);
                let script = format!(
                    r#"
                    (function() {{
                        const candidates = document.querySelectorAll('button, input[type="submit"]');
                        for (let el of candidates) {{
                            const label = el.textContent || el.value || '';
                            if (label.includes('{}')) {{
                                el.setAttribute('{}', '1');
                                return true;
                            }}
                        }}
                        return false;
                    }})()
                    "#,
                    text, attr
                );
                if session.execute_js(&script).await?.as_bool() == Some(true) {
                    return Ok(Some(format!("[{}]", attr)));
                }
            }
        }
    }
    Ok(None)
}

/// Post-submit success condition: the current path equals the offer path,
/// or the full offer URL is contained in the current URL.
pub(crate) fn login_redirect_complete(current_url: &str, offer_url: &str) -> bool {
    let current_path = Url::parse(current_url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let offer_path = Url::parse(offer_url)
        .map(|u| u.path().to_string())
        .unwrap_or_default();

    (!current_path.is_empty() && current_path == offer_path) || current_url.contains(offer_url)
}

/// Log an account in on the already-loaded login page.
pub(crate) async fn perform_login(
    session: &dyn PageDriver,
    offer: &Offer,
    config: &ClaimerConfig,
    signals: &Signals,
    email: &str,
    password: &str,
) -> LoginOutcome {
    for attempt in 1..=config.max_retry {
        match login_attempt(session, offer, config, signals, email, password, attempt).await {
            Ok(true) => return LoginOutcome::Success,
            Ok(false) => {}
            Err(e) => {
                signals.log(format!("❗ Login error: {} (Attempt {})", e, attempt));
            }
        }

        tokio::time::sleep(Duration::from_millis(config.attempt_pause_ms)).await;
    }

    LoginOutcome::Failed
}

async fn login_attempt(
    session: &dyn PageDriver,
    offer: &Offer,
    config: &ClaimerConfig,
    signals: &Signals,
    email: &str,
    password: &str,
    attempt: u32,
) -> Result<bool, BrowserError> {
    let Some(email_field) = locate(session, EMAIL_PROBES, "email").await? else {
        signals.log(format!("❌ Could not find email input (Attempt {})", attempt));
        return Ok(false);
    };

    let Some(password_field) = locate(session, PASSWORD_PROBES, "password").await? else {
        signals.log(format!(
            "❌ Could not find password input (Attempt {})",
            attempt
        ));
        return Ok(false);
    };

    let Some(submit) = locate(session, SUBMIT_PROBES, "login").await? else {
        signals.log(format!("❌ Could not find login button (Attempt {})", attempt));
        return Ok(false);
    };

    session.fill_field(&email_field, email).await?;
    session.fill_field(&password_field, password).await?;
    session.click(&submit).await?;

    // Wait for the post-login redirect, bounded by the settle budget
    let deadline =
        tokio::time::Instant::now() + Duration::from_millis(config.login_settle_ms);
    loop {
        let current_url = session.current_url().await?;
        if login_redirect_complete(&current_url, offer.url()) {
            signals.log(format!("✅ Successfully logged in (Attempt {})", attempt));
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            signals.log(format!(
                "❌ Login failed. Current URL: {} (Attempt {})",
                current_url, attempt
            ));
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_complete_on_path_match() {
        assert!(login_redirect_complete(
            "https://example.com/ucf/Giveaway/cool-game?welcome=1",
            "https://example.com/ucf/Giveaway/cool-game"
        ));
    }

    #[test]
    fn test_redirect_complete_on_url_containment() {
        assert!(login_redirect_complete(
            "https://example.com/ucf/Giveaway/cool-game#claimed",
            "https://example.com/ucf/Giveaway/cool-game"
        ));
    }

    #[test]
    fn test_redirect_incomplete_on_login_page() {
        assert!(!login_redirect_complete(
            "https://example.com/login?return=%2Fucf%2FGiveaway%2Fcool-game",
            "https://example.com/ucf/Giveaway/cool-game"
        ));
    }

    #[test]
    fn test_redirect_with_unparseable_current_url() {
        assert!(!login_redirect_complete("about:blank", "https://example.com/g"));
    }
}
