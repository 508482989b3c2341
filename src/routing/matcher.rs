//! Route matching logic.
//!
//! # Responsibilities
//! - Match path prefix (case-sensitive)
//! - Match path suffix (case-sensitive)
//! - Detect WebSocket upgrade requests from headers
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Upgrade header tokens are case-insensitive (RFC 9110)
//! - No regex to guarantee O(n) matching
//! - Matchers only see metadata; the body is never touched

use axum::body::Body;
use axum::http::{header, HeaderMap, Request};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_path(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matches_path(req.uri().path())
    }
}

/// Matches the request path suffix.
#[derive(Debug, Clone)]
pub struct PathSuffixMatcher {
    suffix: String,
}

impl PathSuffixMatcher {
    /// Create a new path suffix matcher.
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn matches_path(&self, path: &str) -> bool {
        path.ends_with(&self.suffix)
    }
}

impl Matcher for PathSuffixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matches_path(req.uri().path())
    }
}

/// Returns true when the headers ask for a WebSocket upgrade.
///
/// Requires `Upgrade: websocket` and an `upgrade` token in `Connection`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    upgrade && connection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::default()).unwrap()
    }

    #[test]
    fn test_path_prefix_matcher() {
        let matcher = PathPrefixMatcher::new("/bare/");
        assert!(matcher.matches(&request("http://example.com/bare/v3/")));
        assert!(matcher.matches(&request("/bare/")));
        assert!(!matcher.matches(&request("/bare")));
        assert!(!matcher.matches(&request("/BARE/")));
        assert!(!matcher.matches(&request("/x/bare/")));
    }

    #[test]
    fn test_path_suffix_matcher() {
        let matcher = PathSuffixMatcher::new("/wisp/");
        assert!(matcher.matches(&request("/wisp/")));
        assert!(matcher.matches(&request("/nested/wisp/")));
        assert!(!matcher.matches(&request("/wisp")));
        assert!(!matcher.matches(&request("/wisp/extra")));
    }

    #[test]
    fn suffix_ignores_query_string() {
        let matcher = PathSuffixMatcher::new("/wisp/");
        assert!(matcher.matches(&request("/wisp/?token=abc")));
    }

    #[test]
    fn detects_websocket_upgrade() {
        let req = Request::builder()
            .header("Connection", "keep-alive, Upgrade")
            .header("Upgrade", "WebSocket")
            .body(Body::default())
            .unwrap();
        assert!(is_websocket_upgrade(req.headers()));

        let plain = Request::builder()
            .header("Upgrade", "websocket")
            .body(Body::default())
            .unwrap();
        assert!(!is_websocket_upgrade(plain.headers()));

        let h2c = Request::builder()
            .header("Connection", "upgrade")
            .header("Upgrade", "h2c")
            .body(Body::default())
            .unwrap();
        assert!(!is_websocket_upgrade(h2c.headers()));
    }
}
