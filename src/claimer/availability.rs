//! Unavailability detection
//!
//! The site has several ways of saying "no key for you": banner phrases,
//! and a marker element on the claim widget. A detection error is treated
//! as "available" so one flaky read never stalls the claim loop.

use tracing::debug;

use crate::browser::PageDriver;
use crate::signals::Signals;

/// Phrases the site shows when a key cannot be issued, matched
/// case-insensitively anywhere in the page source.
pub const UNAVAILABLE_PHRASES: &[&str] = &[
    "Unfortunately, a key could not be assigned to you",
    "No keys available",
    "Key already issued",
    "Already claimed",
    "key unavailable",
    "requesting",
];

/// Marker element present when the claim widget is in its exhausted state
const UNAVAILABLE_MARKER: &str = ".key-unavailable";

/// Pure phrase check over page source.
pub fn source_reports_unavailable(source: &str) -> bool {
    let lower = source.to_lowercase();
    UNAVAILABLE_PHRASES
        .iter()
        .any(|phrase| lower.contains(&phrase.to_lowercase()))
}

/// Check the live page. Fail-open: errors are logged and count as
/// available.
pub(crate) async fn is_key_unavailable(session: &dyn PageDriver, signals: &Signals) -> bool {
    match session.page_source().await {
        Ok(source) => {
            if source_reports_unavailable(&source) {
                return true;
            }
        }
        Err(e) => {
            signals.log(format!("❗ Availability check error: {}", e));
            return false;
        }
    }

    let marker_script = format!("!!document.querySelector('{}')", UNAVAILABLE_MARKER);
    match session.execute_js(&marker_script).await {
        Ok(value) => value.as_bool() == Some(true),
        Err(e) => {
            debug!("Availability marker check failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_match_is_case_insensitive() {
        assert!(source_reports_unavailable("<p>NO KEYS AVAILABLE right now</p>"));
        assert!(source_reports_unavailable("already claimed by someone"));
    }

    #[test]
    fn test_requesting_counts_as_unavailable() {
        assert!(source_reports_unavailable("Requesting a key..."));
    }

    #[test]
    fn test_clean_page_is_available() {
        assert!(!source_reports_unavailable("<h1>Get your key</h1>"));
    }
}
