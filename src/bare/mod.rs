//! Tunnel-control backend (bare relay, protocol v3).
//!
//! # Responsibilities
//! - Claim every request under the configured prefix (`should_route`)
//! - Serve the manifest at the prefix root
//! - Relay described HTTP requests to their remote (relay.rs)
//! - Relay WebSocket sessions to their remote (websocket.rs)
//!
//! # Data Flow
//! ```text
//! Dispatcher (RouteDecision::TunnelControl)
//!     → BareServer::handle
//!         OPTIONS *        → 200 + CORS
//!         GET <prefix>     → manifest
//!         <prefix>v3/      → relay.rs (HTTP) | websocket.rs (upgrade)
//!         anything else    → UNKNOWN_BARE_ROUTE
//! ```
//!
//! # Design Decisions
//! - Redirects are never followed; the client sees them as data
//! - Loopback and private destinations are refused unless configured
//! - Every response, errors included, carries permissive CORS headers

pub mod error;
pub mod headers;
pub mod relay;
pub mod websocket;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::config::{MaintainerConfig, ServerConfig};
use crate::http::response::close_connection;
use crate::net::{DestinationPolicy, SessionKind, SessionTracker};
use crate::routing::{InboundEvent, Matcher, PathPrefixMatcher};

pub use error::BareError;
pub use relay::Relay;

/// The `GET <prefix>` document.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub versions: Vec<&'static str>,
    pub language: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<MaintainerConfig>,
    pub project: ProjectInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub repository: &'static str,
    pub version: &'static str,
}

impl Manifest {
    fn new(maintainer: Option<MaintainerConfig>) -> Self {
        Self {
            versions: vec!["v3"],
            language: "Rust",
            maintainer,
            project: ProjectInfo {
                name: env!("CARGO_PKG_NAME"),
                description: env!("CARGO_PKG_DESCRIPTION"),
                repository: env!("CARGO_PKG_REPOSITORY"),
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// The bare relay server.
#[derive(Debug, Clone)]
pub struct BareServer {
    prefix: PathPrefixMatcher,
    relay: Relay,
    manifest: Manifest,
    sessions: SessionTracker,
    policy: DestinationPolicy,
    timeout: Duration,
}

impl BareServer {
    pub fn new(config: &ServerConfig, sessions: SessionTracker) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.bare.request_timeout_secs);
        let policy = DestinationPolicy::new(config.bare.allow_loopback_ips, config.bare.allow_private_ips)
            .with_lookup_timeout(timeout);
        Ok(Self {
            prefix: PathPrefixMatcher::new(config.routing.bare_prefix.clone()),
            relay: Relay::new(&config.bare, policy.clone())?,
            manifest: Manifest::new(config.bare.maintainer.clone()),
            sessions,
            policy,
            timeout,
        })
    }

    /// True when this backend owns the request.
    pub fn should_route(&self, req: &Request<Body>) -> bool {
        self.prefix.matches(req)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Serve a request the router handed over.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let event = InboundEvent::of(&req);
        let rest = req
            .uri()
            .path()
            .strip_prefix(self.prefix.prefix())
            .unwrap_or_default()
            .to_string();

        if event == InboundEvent::Http && req.method() == Method::OPTIONS {
            let mut response = StatusCode::OK.into_response();
            headers::apply_cors(response.headers_mut());
            return response;
        }

        match (event, rest.as_str()) {
            (InboundEvent::Http, "") if req.method() == Method::GET => {
                let mut response = Json(&self.manifest).into_response();
                headers::apply_cors(response.headers_mut());
                response
            }
            (InboundEvent::Http, "v3/") => match self.relay.forward(req).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(code = e.code(), error = %e, "Relay request failed");
                    e.into_response()
                }
            },
            (InboundEvent::Upgrade, "v3/") => self.upgrade(req).await,
            (InboundEvent::Upgrade, _) => close_connection(BareError::UnknownRoute.into_response()),
            (InboundEvent::Http, _) => BareError::UnknownRoute.into_response(),
        }
    }

    async fn upgrade(&self, req: Request<Body>) -> Response {
        let (ws, parts) = match crate::http::websocket::upgrade(req).await {
            Ok(pair) => pair,
            Err(response) => return response,
        };
        let session = self.sessions.track(SessionKind::BareWebSocket);
        let remote = websocket::RemoteDial {
            timeout: self.timeout,
            policy: self.policy.clone(),
        };
        ws.on_upgrade(move |socket| websocket::run_session(socket, parts, remote, session))
    }
}

impl Matcher for BareServer {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.should_route(req)
    }
}
