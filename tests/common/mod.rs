//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use proxy_browser::config::ServerConfig;
use proxy_browser::engine::EngineRuntime;
use proxy_browser::http::HttpServer;
use proxy_browser::lifecycle::Shutdown;
use proxy_browser::settings::RewritingEngine;

/// Engine capability fixed at construction.
pub struct StaticRuntime(pub bool);

impl EngineRuntime for StaticRuntime {
    fn is_engine_ready(&self, _engine: RewritingEngine) -> bool {
        self.0
    }
}

/// Start the server on an ephemeral port.
pub async fn start_server(config: ServerConfig) -> (SocketAddr, Shutdown) {
    let server = HttpServer::new(config).unwrap();
    serve(server).await
}

/// Start the server with a fixed engine capability answer.
pub async fn start_server_with_engines(config: ServerConfig, ready: bool) -> (SocketAddr, Shutdown) {
    let server = HttpServer::with_runtime(config, Arc::new(StaticRuntime(ready))).unwrap();
    serve(server).await
}

async fn serve(server: HttpServer) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new(std::time::Duration::from_secs(1));
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (addr, shutdown)
}

/// Start a mock HTTP backend answering every request with `status` and `body`.
///
/// The response carries `x-backend: mock`; the request head is echoed in
/// `x-seen-path`.
pub async fn start_mock_backend(status: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nx-backend: mock\r\nx-seen-path: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    path,
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a TCP server echoing every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Start a WebSocket server echoing every data message back.
pub async fn start_ws_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    addr
}
