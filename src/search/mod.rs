//! Free-form input to destination URL resolution.
//!
//! Classification order, first match wins:
//! 1. absolute `http://` / `https://` URL → unchanged
//! 2. bare domain (`label.tld…`) → `https://` prefixed
//! 3. anything else → search URL on the preferred engine

use std::str::FromStr;
use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://").expect("static pattern"));

static BARE_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+\.[a-zA-Z]{2,}").expect("static pattern"));

/// Percent-encode a URI component.
pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT).to_string()
}

/// Supported search engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    DuckDuckGo,
    Google,
    Bing,
    Brave,
}

impl SearchEngine {
    pub const ALL: [SearchEngine; 4] = [
        SearchEngine::DuckDuckGo,
        SearchEngine::Google,
        SearchEngine::Bing,
        SearchEngine::Brave,
    ];

    /// Base URL the encoded query is appended to.
    pub fn base_url(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "https://duckduckgo.com/",
            SearchEngine::Google => "https://www.google.com/search",
            SearchEngine::Bing => "https://www.bing.com/search",
            SearchEngine::Brave => "https://search.brave.com/search",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::DuckDuckGo => "duckduckgo",
            SearchEngine::Google => "google",
            SearchEngine::Bing => "bing",
            SearchEngine::Brave => "brave",
        }
    }

    /// Parse an engine name, falling back to the default for unknown names.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Search URL for a phrase.
    pub fn search_url(&self, phrase: &str) -> String {
        format!("{}?q={}", self.base_url(), encode_component(phrase))
    }
}

impl FromStr for SearchEngine {
    type Err = UnknownSearchEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SearchEngine::ALL
            .into_iter()
            .find(|engine| engine.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSearchEngine(s.to_string()))
    }
}

impl std::fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown search engine '{0}'")]
pub struct UnknownSearchEngine(pub String);

/// How an input was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Url,
    Domain,
    Search,
}

/// Trim user input; `None` when there is nothing to navigate to.
pub fn normalize_input(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Classify input without building a URL.
pub fn classify(input: &str) -> InputKind {
    if ABSOLUTE_URL.is_match(input) {
        InputKind::Url
    } else if BARE_DOMAIN.is_match(input) {
        InputKind::Domain
    } else {
        InputKind::Search
    }
}

/// Resolve input to a navigable URL using the given search engine.
///
/// Callers must reject blank input with [`normalize_input`] first.
pub fn resolve(input: &str, engine: SearchEngine) -> String {
    match classify(input) {
        InputKind::Url => input.to_string(),
        InputKind::Domain => format!("https://{}", input),
        InputKind::Search => engine.search_url(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_are_unchanged() {
        assert_eq!(resolve("https://foo.org/x", SearchEngine::Google), "https://foo.org/x");
        assert_eq!(resolve("HTTP://Foo.org", SearchEngine::Google), "HTTP://Foo.org");
    }

    #[test]
    fn bare_domains_get_https() {
        assert_eq!(resolve("example.com", SearchEngine::default()), "https://example.com");
        assert_eq!(resolve("sub-1.example.co/path", SearchEngine::default()), "https://sub-1.example.co/path");
    }

    #[test]
    fn phrases_become_searches() {
        assert_eq!(
            resolve("how to bake bread", SearchEngine::DuckDuckGo),
            "https://duckduckgo.com/?q=how%20to%20bake%20bread"
        );
        assert_eq!(
            resolve("rust & tokio", SearchEngine::Brave),
            "https://search.brave.com/search?q=rust%20%26%20tokio"
        );
        // Single-letter TLDs do not count as domains.
        assert_eq!(classify("a.b"), InputKind::Search);
        assert_eq!(classify("ftp://example.com"), InputKind::Search);
    }

    #[test]
    fn encoding_matches_uri_component_rules() {
        assert_eq!(encode_component("a-b_c.d!e~f*g'h(i)j"), "a-b_c.d!e~f*g'h(i)j");
        assert_eq!(encode_component("a/b?c=d#e"), "a%2Fb%3Fc%3Dd%23e");
        assert_eq!(encode_component("café"), "caf%C3%A9");
    }

    #[test]
    fn unknown_engine_falls_back_to_duckduckgo() {
        assert_eq!(SearchEngine::from_name_or_default("altavista"), SearchEngine::DuckDuckGo);
        assert_eq!(SearchEngine::from_name_or_default("Bing"), SearchEngine::Bing);
    }

    #[test]
    fn resolve_is_deterministic() {
        let first = resolve("some query", SearchEngine::Google);
        let second = resolve("some query", SearchEngine::Google);
        assert_eq!(first, second);
    }

    #[test]
    fn blank_input_is_rejected() {
        assert_eq!(normalize_input("   \t"), None);
        assert_eq!(normalize_input("  rust "), Some("rust"));
    }
}
