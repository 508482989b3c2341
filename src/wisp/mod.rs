//! Transport endpoint: wisp v1 over WebSocket.
//!
//! # Responsibilities
//! - Complete the upgrade for requests routed as TunnelTransport
//! - Multiplex TCP/UDP streams over the socket (session.rs)
//! - Dial only destinations the shared `net::DestinationPolicy` allows
//!
//! # Data Flow
//! ```text
//! Dispatcher (RouteDecision::TunnelTransport)
//!     → WispServer::handle (handshake, session guard)
//!     → session.rs (packet loop, one task per stream)
//!     → packet.rs (frame codec)
//! ```

pub mod packet;
pub mod session;

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

use crate::config::WispConfig;
use crate::net::{DestinationPolicy, SessionKind, SessionTracker};

pub use packet::{CloseReason, Packet, StreamType, WispError};
pub use session::SessionSettings;

/// Accepts wisp sessions.
#[derive(Debug, Clone)]
pub struct WispServer {
    settings: SessionSettings,
    sessions: SessionTracker,
}

impl WispServer {
    pub fn new(config: &WispConfig, sessions: SessionTracker) -> Self {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        Self {
            settings: SessionSettings {
                buffer_size: config.buffer_size,
                connect_timeout,
                allow_udp: config.allow_udp_streams,
                policy: DestinationPolicy::new(config.allow_loopback_ips, config.allow_private_ips)
                    .with_lookup_timeout(connect_timeout),
            },
            sessions,
        }
    }

    /// Take over an upgrade request.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let (ws, _parts) = match crate::http::websocket::upgrade(req).await {
            Ok(pair) => pair,
            Err(response) => return response,
        };
        let session = self.sessions.track(SessionKind::Wisp);
        let settings = self.settings.clone();
        ws.on_upgrade(move |socket| session::run_session(socket, settings, session))
    }
}
