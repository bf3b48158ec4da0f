//! Key extraction
//!
//! Keys show up in three places depending on how the page reacted: the
//! notification widget, the raw page source, or an arbitrary text node.
//! Extraction tries each in a fixed order; the first hit wins.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::browser::PageDriver;

/// Key label patterns in precedence order. A key token is uppercase
/// letters, digits and hyphens.
static KEY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Key:\s*([A-Z0-9\-]+)",
        r"Game Key:\s*([A-Z0-9\-]+)",
        r"Serial:\s*([A-Z0-9\-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("key pattern"))
    .collect()
});

/// Scan raw page source for a labelled key.
pub fn extract_key_from_source(source: &str) -> Option<String> {
    KEY_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(source))
        .map(|caps| caps[1].to_string())
}

/// Check whether the page already displays a claimed key: an in-page text
/// scan first, then a regex over the raw HTML.
pub(crate) async fn extract_existing_key(session: &dyn PageDriver) -> Option<String> {
    let script = r#"
        (function() {
            const keyElements = document.querySelectorAll('p, div, span');
            for (let el of keyElements) {
                const keyMatch = el.textContent.match(/Key:\s*([A-Z0-9\-]+)/);
                if (keyMatch) return keyMatch[1];
            }
            return null;
        })()
    "#;

    match session.execute_js(script).await {
        Ok(value) => {
            if let Some(key) = value.as_str() {
                return Some(key.to_string());
            }
        }
        Err(e) => debug!("Existing-key scan failed: {}", e),
    }

    match session.page_source().await {
        Ok(source) => extract_key_from_source(&source),
        Err(e) => {
            debug!("Existing-key source fetch failed: {}", e);
            None
        }
    }
}

/// Extract a freshly issued key after a claim trigger. Three independent
/// probes, first non-empty result wins.
pub(crate) async fn extract_key_from_page(session: &dyn PageDriver) -> Option<String> {
    // 1) The notification widget the site pops after issuing a key
    let notify_script = r#"
        (function() {
            const notifyContainer = document.querySelector('div[data-notify="container"]');
            if (notifyContainer) {
                const keyElement = notifyContainer.querySelector('[data-notify="message"] p');
                if (keyElement && keyElement.textContent.includes('Key:')) {
                    const keyMatch = keyElement.textContent.match(/Key:\s*([A-Z0-9\-]+)/);
                    return keyMatch ? keyMatch[1] : null;
                }
            }
            return null;
        })()
    "#;

    match session.execute_js(notify_script).await {
        Ok(value) => {
            if let Some(key) = value.as_str() {
                return Some(key.to_string());
            }
        }
        Err(e) => debug!("Notification scan failed: {}", e),
    }

    // 2) Regex over raw page source
    match session.page_source().await {
        Ok(source) => {
            if let Some(key) = extract_key_from_source(&source) {
                return Some(key);
            }
        }
        Err(e) => debug!("Page source fetch failed: {}", e),
    }

    // 3) Broad scan across every DOM text node
    let broad_script = r#"
        (function() {
            const elements = document.querySelectorAll('*');
            for (let el of elements) {
                if (el.textContent.includes('Key:')) {
                    const keyMatch = el.textContent.match(/Key:\s*([A-Z0-9\-]+)/);
                    if (keyMatch) return keyMatch[1];
                }
            }
            return null;
        })()
    "#;

    match session.execute_js(broad_script).await {
        Ok(value) => value.as_str().map(|k| k.to_string()),
        Err(e) => {
            debug!("Broad DOM scan failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_plain_key_label() {
        assert_eq!(
            extract_key_from_source("your code is Key: ABC-123 enjoy"),
            Some("ABC-123".to_string())
        );
    }

    #[test]
    fn test_extracts_game_key_label() {
        assert_eq!(
            extract_key_from_source("Game Key: XY9"),
            Some("XY9".to_string())
        );
    }

    #[test]
    fn test_extracts_serial_label() {
        assert_eq!(extract_key_from_source("Serial: Z-0"), Some("Z-0".to_string()));
    }

    #[test]
    fn test_label_precedence() {
        // "Key:" is checked first even when a later label also matches
        assert_eq!(
            extract_key_from_source("Serial: AAA-1 and Key: BBB-2"),
            Some("BBB-2".to_string())
        );
    }

    #[test]
    fn test_no_match_on_lowercase_token() {
        assert_eq!(extract_key_from_source("Key: abc-123"), None);
    }

    #[test]
    fn test_no_match_without_label() {
        assert_eq!(extract_key_from_source("nothing to see here"), None);
    }
}
