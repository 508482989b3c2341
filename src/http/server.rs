//! HTTP server setup and dispatch.
//!
//! # Responsibilities
//! - Build the application router (API, static mounts, UI bundle)
//! - Wire up middleware (request ID, admission limit, tracing, timeout, CORS)
//! - Hand every inbound event to exactly one backend per the routing decision
//! - Bind server to listener and drain on shutdown
//!
//! # Data Flow
//! ```text
//! Request
//!     → SetRequestId → PropagateRequestId → GlobalConcurrencyLimit
//!     → dispatch (Router::route)
//!         TunnelControl   → BareServer::handle
//!         TunnelTransport → WispServer::handle
//!         Application     → application router (oneshot)
//!         Reject          → 400 + Connection: close
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::bare::BareServer;
use crate::config::ServerConfig;
use crate::engine::{BundleRuntime, EngineAdapter, EngineRuntime};
use crate::http::api::{self, ApiContext};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::reject_connection;
use crate::net::SessionTracker;
use crate::observability::metrics;
use crate::routing::{InboundEvent, RouteDecision, Router as ProxyRouter};
use crate::wisp::WispServer;

/// Startup failures of the server itself.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build relay client: {0}")]
    RelayClient(#[from] reqwest::Error),
}

/// Backends the dispatcher hands events to.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub bare: Arc<BareServer>,
    pub wisp: Arc<WispServer>,
    pub app: axum::Router,
}

/// HTTP server for the proxy browser.
pub struct HttpServer {
    router: axum::Router,
    config: ServerConfig,
    sessions: SessionTracker,
}

impl HttpServer {
    /// Create a server whose engine readiness comes from bundle files on disk.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let runtime = Arc::new(BundleRuntime::from_config(&config));
        Self::with_runtime(config, runtime)
    }

    /// Create a server with an explicit engine capability source.
    pub fn with_runtime(config: ServerConfig, runtime: Arc<dyn EngineRuntime>) -> Result<Self, ServerError> {
        let sessions = SessionTracker::new();

        let bare = Arc::new(BareServer::new(&config, sessions.clone())?);
        let wisp = Arc::new(WispServer::new(&config.wisp, sessions.clone()));
        let router = Arc::new(ProxyRouter::new(bare.clone(), config.routing.wisp_suffix.clone()));

        let adapter = EngineAdapter::from_config(&config, runtime);
        let ctx = Arc::new(ApiContext::new(&config, adapter, sessions.clone()));
        let app = Self::build_application(&config, ctx);

        let state = AppState {
            router,
            bare,
            wisp,
            app,
        };
        let router = Self::build_router(&config, state);

        Ok(Self {
            router,
            config,
            sessions,
        })
    }

    /// API routes, static mounts and the UI bundle fallback.
    #[allow(deprecated)]
    fn build_application(config: &ServerConfig, ctx: Arc<ApiContext>) -> axum::Router {
        let mut app = axum::Router::new()
            .route("/api/search", get(api::search_handler))
            .route("/api/proxy", get(api::proxy_handler))
            .route("/health", get(api::health_handler))
            .with_state(ctx);

        let engine_mounts = config
            .static_files
            .engines
            .iter()
            .map(|e| (e.mount.as_str(), e.dir.as_str()));
        let plain_mounts = config
            .static_files
            .mounts
            .iter()
            .map(|m| (m.path.as_str(), m.dir.as_str()));
        for (path, dir) in engine_mounts.chain(plain_mounts) {
            let path = path.trim_end_matches('/');
            if path.is_empty() {
                tracing::warn!(dir = %dir, "Skipping static mount at the root path");
                continue;
            }
            tracing::debug!(path = %path, dir = %dir, "Mounting static assets");
            app = app.nest_service(path, ServeDir::new(dir));
        }

        app.fallback_service(ServeDir::new(&config.static_files.public_dir))
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The dispatcher with its outer middleware.
    fn build_router(config: &ServerConfig, state: AppState) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// The fully layered service, for serving or in-process tests.
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Route one inbound event and hand it to its backend.
async fn dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let event = InboundEvent::of(&req);
    let decision = state.router.route(event, &req);

    tracing::debug!(
        request_id = %request_id(req.headers()),
        method = %req.method(),
        path = %req.uri().path(),
        event = ?event,
        decision = %decision,
        "Routed inbound event"
    );
    metrics::record_route(decision);

    match decision {
        RouteDecision::TunnelControl => state.bare.handle(req).await,
        RouteDecision::TunnelTransport => state.wisp.handle(req).await,
        RouteDecision::Application => match state.app.oneshot(req).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        },
        RouteDecision::Reject => reject_connection(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn server() -> HttpServer {
        HttpServer::new(ServerConfig::default()).unwrap()
    }

    fn upgrade(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_goes_to_application() {
        let response = server()
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn unclaimed_upgrade_is_rejected_with_close() {
        let response = server().router().oneshot(upgrade("/socket")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["connection"], "close");
    }

    #[tokio::test]
    async fn client_request_id_is_kept() {
        let response = server()
            .router()
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn bare_manifest_is_served_under_prefix() {
        let response = server()
            .router()
            .oneshot(Request::get("/bare/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
