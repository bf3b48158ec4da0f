//! Claim trigger strategies
//!
//! Three ways of pressing "Get Key", tried in order of directness. Each
//! trigger is followed by the same extraction routine; the first strategy
//! that yields a key short-circuits the rest.

use std::time::Duration;

use tracing::debug;

use super::extract::extract_key_from_page;
use super::login::{locate, Probe};
use crate::browser::{BrowserError, PageDriver};

const GET_KEY_PROBES: &[Probe] = &[
    Probe::Css("#giveaway-get-key"),
    Probe::ButtonText("Get Key"),
    Probe::Css("button.get-key-btn"),
];

/// How long a trigger waits for the page to react before extraction
const TRIGGER_SETTLE: Duration = Duration::from_secs(2);
const SCRIPT_SETTLE: Duration = Duration::from_secs(3);

/// Condition for the wait-then-click strategy: a visible Get Key button
const GET_KEY_VISIBLE: &str = r#"
    (function() {
        const buttons = document.querySelectorAll('button');
        for (let btn of buttons) {
            if (btn.textContent.includes('Get Key') && btn.offsetParent !== null) {
                return true;
            }
        }
        return false;
    })()
"#;

/// Direct probe-and-click.
pub(crate) async fn direct_get_key(
    session: &dyn PageDriver,
) -> Result<Option<String>, BrowserError> {
    for probe in GET_KEY_PROBES {
        let Some(selector) = locate(session, std::slice::from_ref(probe), "getkey").await? else {
            continue;
        };

        if let Err(e) = session.click(&selector).await {
            debug!("Get Key click failed for {}: {}", selector, e);
            continue;
        }

        tokio::time::sleep(TRIGGER_SETTLE).await;

        if let Some(key) = extract_key_from_page(session).await {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

/// Wait for the button to become visible, then click it.
pub(crate) async fn wait_then_click_get_key(
    session: &dyn PageDriver,
) -> Result<Option<String>, BrowserError> {
    if !session
        .wait_for_script(GET_KEY_VISIBLE, Duration::from_secs(10))
        .await?
    {
        return Ok(None);
    }

    let Some(selector) = locate(session, &[Probe::ButtonText("Get Key")], "getkey-wait").await?
    else {
        return Ok(None);
    };
    session.click(&selector).await?;

    tokio::time::sleep(SCRIPT_SETTLE).await;
    Ok(extract_key_from_page(session).await)
}

/// Script-injected click: scan every button for the label and click from
/// inside the page. Catches buttons the element-level click cannot reach.
pub(crate) async fn injected_get_key(
    session: &dyn PageDriver,
) -> Result<Option<String>, BrowserError> {
    session
        .execute_js(
            r#"
            (function() {
                let buttons = document.querySelectorAll('button');
                for (let btn of buttons) {
                    if (btn.textContent.includes('Get Key')) {
                        btn.click();
                        break;
                    }
                }
            })()
            "#,
        )
        .await?;

    tokio::time::sleep(SCRIPT_SETTLE).await;
    Ok(extract_key_from_page(session).await)
}
