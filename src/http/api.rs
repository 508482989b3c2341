//! Application API handlers.
//!
//! # Endpoints
//! - `GET /api/search?q=&engine=` → `{url}` (engine search URL, `q` percent-encoded)
//! - `GET /api/proxy?q=&engine=&transport=&search=` → `{url, proxiedUrl, engine, transport}`
//! - `GET /health` → service status and live session counts

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ServerConfig;
use crate::engine::{EngineAdapter, EngineError, ProxiedUrl, TransportSetup};
use crate::http::response::json_error;
use crate::net::{SessionKind, SessionTracker};
use crate::search::{self, SearchEngine};
use crate::settings::{RewritingEngine, Transport, UserPreferences};

const QUERY_REQUIRED: &str = "Query parameter required";

/// Shared state for the application handlers.
#[derive(Debug)]
pub struct ApiContext {
    pub adapter: EngineAdapter,
    pub sessions: SessionTracker,
    /// Plain mounts reported by `/health`, by name and directory.
    pub mounts: Vec<(String, String)>,
}

impl ApiContext {
    pub fn new(config: &ServerConfig, adapter: EngineAdapter, sessions: SessionTracker) -> Self {
        Self {
            adapter,
            sessions,
            mounts: config
                .static_files
                .mounts
                .iter()
                .map(|m| (m.name.clone(), m.dir.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    engine: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    url: String,
}

pub async fn search_handler(Query(params): Query<SearchParams>) -> Response {
    let Some(input) = params.q.as_deref().and_then(search::normalize_input) else {
        return json_error(StatusCode::BAD_REQUEST, QUERY_REQUIRED);
    };
    let engine = params
        .engine
        .as_deref()
        .map(SearchEngine::from_name_or_default)
        .unwrap_or_default();
    // Always a search; URL-like input is encoded like any other phrase.
    let url = engine.search_url(input);
    tracing::debug!(engine = %engine, url = %url, "Built search URL");
    Json(SearchResponse { url }).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    q: Option<String>,
    engine: Option<String>,
    transport: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyResponse {
    url: String,
    proxied_url: ProxiedUrl,
    engine: RewritingEngine,
    transport: TransportSetup,
}

pub async fn proxy_handler(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(params): Query<ProxyParams>,
) -> Response {
    let Some(input) = params.q.as_deref().and_then(search::normalize_input) else {
        return json_error(StatusCode::BAD_REQUEST, QUERY_REQUIRED);
    };
    let mut adapter = ctx.adapter.clone();
    let engine = match params.engine.as_deref().map(str::parse::<RewritingEngine>) {
        None => adapter.active_engine(),
        Some(Ok(engine)) => engine,
        Some(Err(e)) => return json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let transport = match params.transport.as_deref().map(str::parse::<Transport>) {
        None => adapter.active_transport(),
        Some(Ok(transport)) => transport,
        Some(Err(e)) => return json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let prefs = UserPreferences {
        rewriting_engine: engine,
        transport,
        search_engine: params
            .search
            .as_deref()
            .map(SearchEngine::from_name_or_default)
            .unwrap_or_default(),
        ..UserPreferences::default()
    };

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let secure = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false);

    let url = search::resolve(input, prefs.search_engine);
    let transport = adapter.configure(&prefs, host, secure);
    let proxied_url = match adapter.open(&url) {
        Ok(proxied) => proxied,
        Err(e @ (EngineError::Unavailable(_) | EngineError::NotConfigured(_))) => {
            tracing::warn!(engine = %engine, error = %e, "Proxy request for an unavailable engine");
            return json_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
    };

    Json(ProxyResponse {
        url,
        proxied_url,
        engine,
        transport,
    })
    .into_response()
}

pub async fn health_handler(State(ctx): State<Arc<ApiContext>>) -> impl IntoResponse {
    let mut services = serde_json::Map::new();
    services.insert("bare".into(), json!("running"));
    services.insert("wisp".into(), json!("running"));
    for engine in [RewritingEngine::Ultraviolet, RewritingEngine::Scramjet] {
        services.insert(engine.as_str().into(), availability(ctx.adapter.is_engine_ready(engine)));
    }
    for (name, dir) in &ctx.mounts {
        services.insert(name.clone(), availability(Path::new(dir).is_dir()));
    }

    Json(json!({
        "status": "ok",
        "services": services,
        "activeSessions": {
            "wisp": ctx.sessions.active(SessionKind::Wisp),
            "bare": ctx.sessions.active(SessionKind::BareWebSocket),
        },
    }))
}

fn availability(ready: bool) -> serde_json::Value {
    json!(if ready { "available" } else { "unavailable" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineRuntime;

    struct Ready(bool);

    impl EngineRuntime for Ready {
        fn is_engine_ready(&self, _engine: RewritingEngine) -> bool {
            self.0
        }
    }

    fn context(ready: bool) -> Arc<ApiContext> {
        let config = ServerConfig::default();
        let adapter = EngineAdapter::from_config(&config, Arc::new(Ready(ready)));
        Arc::new(ApiContext::new(&config, adapter, SessionTracker::new()))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn search_params(q: Option<&str>, engine: Option<&str>) -> Query<SearchParams> {
        Query(SearchParams {
            q: q.map(str::to_string),
            engine: engine.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn search_requires_query() {
        let response = search_handler(search_params(Some("   "), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], QUERY_REQUIRED);
    }

    #[tokio::test]
    async fn search_encodes_url_like_input() {
        let response = search_handler(search_params(Some("example.com/a b"), None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["url"],
            "https://duckduckgo.com/?q=example.com%2Fa%20b"
        );
    }

    #[tokio::test]
    async fn search_uses_named_engine() {
        let response = search_handler(search_params(Some("rust lang"), Some("bing"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["url"], "https://www.bing.com/search?q=rust%20lang");
    }

    fn proxy_params(q: &str, engine: Option<&str>, transport: Option<&str>) -> Query<ProxyParams> {
        Query(ProxyParams {
            q: Some(q.to_string()),
            engine: engine.map(str::to_string),
            transport: transport.map(str::to_string),
            search: None,
        })
    }

    #[tokio::test]
    async fn proxy_unavailable_engine_is_503() {
        let response = proxy_handler(State(context(false)), HeaderMap::new(), proxy_params("example.com", None, None)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn proxy_builds_encoded_url_and_tunnel_setup() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "proxy.test:3000".parse().unwrap());
        let response = proxy_handler(
            State(context(true)),
            headers,
            proxy_params("https://example.com", Some("uv"), Some("epoxy")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["url"], "https://example.com");
        assert_eq!(json["proxiedUrl"], "/uv/service/hvtrs8%2F-ezaopne%2Ccmm");
        assert_eq!(json["engine"], "ultraviolet");
        assert_eq!(json["transport"]["kind"], "epoxy");
        assert_eq!(json["transport"]["wisp"], "ws://proxy.test:3000/wisp/");
    }

    #[tokio::test]
    async fn proxy_rejects_unknown_engine() {
        let response = proxy_handler(State(context(true)), HeaderMap::new(), proxy_params("x", Some("nope"), None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_services() {
        let response = health_handler(State(context(false))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["services"]["bare"], "running");
        assert_eq!(json["services"]["ultraviolet"], "unavailable");
        assert_eq!(json["activeSessions"]["wisp"], 0);
    }
}
