//! End-to-end dispatch tests over a real listener.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use proxy_browser::config::ServerConfig;

mod common;

const UPGRADE_HEAD: &str = "Connection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n";

/// Send a raw upgrade request and read until the server closes the socket.
async fn raw_upgrade(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\n{UPGRADE_HEAD}\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server kept the rejected connection open")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_health_reports_services() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    let res = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["services"]["bare"], "running");
    assert_eq!(json["services"]["wisp"], "running");
}

#[tokio::test]
async fn test_search_endpoint() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("http://{addr}/api/search"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["error"], "Query parameter required");

    let res = client
        .get(format!("http://{addr}/api/search"))
        .query(&[("q", "hello world")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["url"], "https://duckduckgo.com/?q=hello%20world");

    let res = client
        .get(format!("http://{addr}/api/search"))
        .query(&[("q", "example.com/a b")])
        .send()
        .await
        .unwrap();
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["url"], "https://duckduckgo.com/?q=example.com%2Fa%20b");
}

#[tokio::test]
async fn test_application_responses_allow_any_origin() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    let res = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .header("origin", "https://elsewhere.example")
        .send()
        .await
        .unwrap();
    assert!(res.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_missing_static_file_is_not_found() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    let res = reqwest::get(format!("http://{addr}/uv/does-not-exist.js")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_static_mount_serves_bundle() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("uv.bundle.js"), "// bundle").unwrap();

    let mut config = ServerConfig::default();
    config.static_files.engines[0].dir = dir.path().to_string_lossy().into_owned();
    let (addr, _shutdown) = common::start_server(config).await;

    let res = reqwest::get(format!("http://{addr}/uv/uv.bundle.js")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "// bundle");

    let json: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["services"]["ultraviolet"], "available");
    assert_eq!(json["services"]["scramjet"], "unavailable");
}

#[tokio::test]
async fn test_proxy_endpoint_without_engine_is_unavailable() {
    let (addr, _shutdown) = common::start_server_with_engines(ServerConfig::default(), false).await;

    let res = reqwest::Client::new()
        .get(format!("http://{addr}/api/proxy"))
        .query(&[("q", "example.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_proxy_endpoint_encodes_destination() {
    let (addr, _shutdown) = common::start_server_with_engines(ServerConfig::default(), true).await;

    let res = reqwest::Client::new()
        .get(format!("http://{addr}/api/proxy"))
        .query(&[("q", "https://example.com")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json: Value = res.json().await.unwrap();
    assert_eq!(json["proxiedUrl"], "/uv/service/hvtrs8%2F-ezaopne%2Ccmm");
    assert_eq!(json["transport"]["kind"], "bare");
    assert_eq!(json["transport"]["server"], "/bare/");
}

#[tokio::test]
async fn test_unclaimed_upgrade_is_closed() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    let response = raw_upgrade(addr, "/not-a-socket").await;
    assert!(response.starts_with("HTTP/1.1 400"), "got: {response}");
}

#[tokio::test]
async fn test_upgrade_to_wisp_suffix_is_accepted() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    let (_ws, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/any/path/wisp/"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 101);
}

#[tokio::test]
async fn test_http_request_to_wisp_suffix_goes_to_application() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    // Without an upgrade the transport suffix has no meaning.
    let res = reqwest::get(format!("http://{addr}/wisp/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tunnel_control_wins_over_transport_suffix() {
    let (addr, _shutdown) = common::start_server(ServerConfig::default()).await;

    // Claimed by the bare backend, which has no route for this path.
    let response = raw_upgrade(addr, "/bare/wisp/").await;
    assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
}
