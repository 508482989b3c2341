//! Connection routing and dispatch decisions.
//!
//! # Responsibilities
//! - Classify each inbound event as a plain HTTP request or an upgrade
//! - Evaluate the priority-ordered predicate chain for that kind
//! - Return exactly one RouteDecision
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - The tunnel-control backend's own `should_route` is consulted first
//! - Unmatched HTTP defaults to Application; unmatched upgrades to Reject

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;

use crate::routing::matcher::{is_websocket_upgrade, Matcher, PathSuffixMatcher};

/// Kind of inbound network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// A plain HTTP request.
    Http,
    /// A WebSocket upgrade attempt.
    Upgrade,
}

impl InboundEvent {
    /// Classify a request by its headers.
    pub fn of(req: &Request<Body>) -> Self {
        if is_websocket_upgrade(req.headers()) {
            InboundEvent::Upgrade
        } else {
            InboundEvent::Http
        }
    }
}

/// Which backend takes ownership of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    TunnelControl,
    TunnelTransport,
    Application,
    Reject,
}

impl RouteDecision {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::TunnelControl => "tunnel_control",
            RouteDecision::TunnelTransport => "tunnel_transport",
            RouteDecision::Application => "application",
            RouteDecision::Reject => "reject",
        }
    }
}

impl std::fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing predicate table.
#[derive(Debug, Clone)]
pub struct Router {
    tunnel_control: Arc<dyn Matcher>,
    transport: PathSuffixMatcher,
}

impl Router {
    /// Build the table from the tunnel-control backend's own predicate and
    /// the transport endpoint suffix.
    pub fn new(tunnel_control: Arc<dyn Matcher>, transport_suffix: impl Into<String>) -> Self {
        Self {
            tunnel_control,
            transport: PathSuffixMatcher::new(transport_suffix),
        }
    }

    /// Classify a plain HTTP request.
    pub fn route_http(&self, req: &Request<Body>) -> RouteDecision {
        if self.tunnel_control.matches(req) {
            RouteDecision::TunnelControl
        } else {
            RouteDecision::Application
        }
    }

    /// Classify a WebSocket upgrade attempt.
    pub fn route_upgrade(&self, req: &Request<Body>) -> RouteDecision {
        if self.tunnel_control.matches(req) {
            RouteDecision::TunnelControl
        } else if self.transport.matches(req) {
            RouteDecision::TunnelTransport
        } else {
            RouteDecision::Reject
        }
    }

    /// Classify any inbound event.
    pub fn route(&self, event: InboundEvent, req: &Request<Body>) -> RouteDecision {
        match event {
            InboundEvent::Http => self.route_http(req),
            InboundEvent::Upgrade => self.route_upgrade(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::matcher::PathPrefixMatcher;

    fn router() -> Router {
        Router::new(Arc::new(PathPrefixMatcher::new("/bare/")), "/wisp/")
    }

    fn http(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::default()).unwrap()
    }

    fn upgrade(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .body(Body::default())
            .unwrap()
    }

    #[test]
    fn unmatched_paths_fall_back() {
        let router = router();
        for path in ["/", "/index.html", "/api/search?q=x", "/uv/uv.bundle.js", "/bare", "/wisp"] {
            assert_eq!(router.route_http(&http(path)), RouteDecision::Application, "{path}");
            assert_eq!(router.route_upgrade(&upgrade(path)), RouteDecision::Reject, "{path}");
        }
    }

    #[test]
    fn tunnel_control_wins_for_both_kinds() {
        let router = router();
        for path in ["/bare/", "/bare/v3/", "/bare/wisp/"] {
            assert_eq!(router.route_http(&http(path)), RouteDecision::TunnelControl, "{path}");
            assert_eq!(router.route_upgrade(&upgrade(path)), RouteDecision::TunnelControl, "{path}");
        }
    }

    #[test]
    fn transport_suffix_only_for_upgrades() {
        let router = router();
        for path in ["/wisp/", "/a/b/wisp/"] {
            assert_eq!(router.route_upgrade(&upgrade(path)), RouteDecision::TunnelTransport, "{path}");
            assert_eq!(router.route_http(&http(path)), RouteDecision::Application, "{path}");
        }
    }

    #[test]
    fn route_dispatches_on_event_kind() {
        let router = router();
        let req = upgrade("/wisp/");
        assert_eq!(InboundEvent::of(&req), InboundEvent::Upgrade);
        assert_eq!(router.route(InboundEvent::of(&req), &req), RouteDecision::TunnelTransport);

        let req = http("/wisp/");
        assert_eq!(InboundEvent::of(&req), InboundEvent::Http);
        assert_eq!(router.route(InboundEvent::of(&req), &req), RouteDecision::Application);
    }
}
