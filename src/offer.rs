//! Offer identity
//!
//! Derives everything the claimer needs from the giveaway page URL: the
//! human-readable offer name (used only for filenames), the sanitized file
//! stem, and the login link with the offer path as the `return` parameter.

use url::Url;

/// Path marker that precedes the offer slug in giveaway URLs
const GIVEAWAY_MARKER: &str = "Giveaway/";

/// Fallback name when the URL carries no recognizable offer slug
pub const UNKNOWN_OFFER: &str = "Unknown Offer";

/// A single giveaway campaign, identified by its page URL.
#[derive(Debug, Clone)]
pub struct Offer {
    url: String,
    name: String,
}

impl Offer {
    /// Build an offer from its page URL. Malformed URLs are accepted as-is;
    /// they simply produce the placeholder name and no login link.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            name: extract_offer_name(url),
        }
    }

    /// The original offer page URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Human-readable offer name, e.g. "Cool Game Steam Key"
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offer name reduced to filename-safe characters
    pub fn sanitized_name(&self) -> String {
        sanitize_filename(&self.name)
    }

    /// Login URL for the offer's site, carrying the offer path as a
    /// URL-encoded `return` parameter so the site redirects back after
    /// authentication.
    pub fn login_link(&self) -> Option<String> {
        let parsed = Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        let netloc = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let encoded_return = urlencoding::encode(parsed.path());
        Some(format!(
            "{}://{}/login?return={}",
            parsed.scheme(),
            netloc,
            encoded_return
        ))
    }
}

/// Derive the offer name from the path segment after `Giveaway/`:
/// hyphens become spaces, each word is title-cased.
pub fn extract_offer_name(url: &str) -> String {
    match url.split_once(GIVEAWAY_MARKER) {
        Some((_, slug)) if !slug.is_empty() => title_case(&slug.replace('-', " ")),
        _ => UNKNOWN_OFFER.to_string(),
    }
}

/// Keep alphanumerics, spaces and hyphens; strip trailing whitespace.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect();
    kept.trim_end().to_string()
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_name_from_slug() {
        let offer = Offer::new("https://example.com/ucf/Giveaway/cool-game-steam-key");
        assert_eq!(offer.name(), "Cool Game Steam Key");
    }

    #[test]
    fn test_offer_name_without_marker() {
        let offer = Offer::new("https://example.com/some/other/page");
        assert_eq!(offer.name(), UNKNOWN_OFFER);
    }

    #[test]
    fn test_offer_name_normalizes_case() {
        assert_eq!(
            extract_offer_name("https://example.com/Giveaway/LOUD-game"),
            "Loud Game"
        );
    }

    #[test]
    fn test_login_link_is_deterministic() {
        let offer = Offer::new("https://example.com/ucf/Giveaway/cool-game");
        let first = offer.login_link().unwrap();
        let second = offer.login_link().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            "https://example.com/login?return=%2Fucf%2FGiveaway%2Fcool-game"
        );
    }

    #[test]
    fn test_login_link_return_round_trips() {
        let offer = Offer::new("https://example.com/ucf/Giveaway/cool-game");
        let link = offer.login_link().unwrap();
        let parsed = Url::parse(&link).unwrap();
        let return_path = parsed
            .query_pairs()
            .find(|(k, _)| k == "return")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(return_path, "/ucf/Giveaway/cool-game");
    }

    #[test]
    fn test_login_link_preserves_port() {
        let offer = Offer::new("http://localhost:8080/Giveaway/test-offer");
        assert_eq!(
            offer.login_link().unwrap(),
            "http://localhost:8080/login?return=%2FGiveaway%2Ftest-offer"
        );
    }

    #[test]
    fn test_login_link_malformed_url() {
        let offer = Offer::new("not a url");
        assert!(offer.login_link().is_none());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Cool Game: Deluxe!"), "Cool Game Deluxe");
        assert_eq!(sanitize_filename("Spaced out  "), "Spaced out");
        assert_eq!(sanitize_filename("dash-ed"), "dash-ed");
    }
}
