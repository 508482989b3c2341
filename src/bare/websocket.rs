//! WebSocket relay for `v3` upgrades.
//!
//! # Data Flow
//! ```text
//! Client ──upgrade──→ relay
//! Client ──{"type":"connect", remote, protocols, headers, forwardHeaders}──→ relay
//! relay ──handshake──→ Remote
//! relay ──{"type":"open", protocol, setCookies}──→ Client
//! Client ←──── frames ────→ relay ←──── frames ────→ Remote
//! ```
//!
//! # Design Decisions
//! - The connect message must arrive within the relay timeout
//! - A failed remote handshake closes the client socket with 1011
//! - The remote is dialed at the addresses the destination policy
//!   approved; a refused destination closes with 1008
//! - The session guard lives as long as the pump

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::http::request::Parts;
use axum::http::{header, HeaderName, HeaderValue};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Response as RemoteResponse;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::bare::headers::{to_header_map, BareHeaders, FORBIDDEN_FORWARD_HEADERS};
use crate::http::websocket::{close_frame, from_remote, to_remote};
use crate::net::{DestinationPolicy, PolicyError, SessionGuard};

const CLOSE_POLICY: u16 = 1008;
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectMessage {
    #[serde(rename = "type")]
    kind: String,
    remote: String,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    headers: BareHeaders,
    #[serde(default)]
    forward_headers: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    protocol: String,
    set_cookies: Vec<String>,
}

/// How the relay reaches remotes.
#[derive(Debug, Clone)]
pub struct RemoteDial {
    pub timeout: Duration,
    pub policy: DestinationPolicy,
}

enum DialFailure {
    Refused(PolicyError),
    Remote(String),
}

/// Run one relayed WebSocket session to completion.
pub async fn run_session(mut socket: WebSocket, upgrade: Parts, dial: RemoteDial, session: SessionGuard) {
    let timeout = dial.timeout;
    let connect = match tokio::time::timeout(timeout, read_connect(&mut socket)).await {
        Ok(Ok(connect)) => connect,
        Ok(Err(reason)) => {
            tracing::debug!(session_id = %session.id(), reason = %reason, "Rejecting relay session");
            let _ = socket.send(close_frame(CLOSE_POLICY, &reason)).await;
            return;
        }
        Err(_) => {
            tracing::debug!(session_id = %session.id(), "Timed out waiting for connect message");
            let _ = socket.send(close_frame(CLOSE_POLICY, "connect timeout")).await;
            return;
        }
    };

    let request = match build_remote_request(&connect, &upgrade) {
        Ok(request) => request,
        Err(reason) => {
            tracing::debug!(session_id = %session.id(), reason = %reason, "Invalid connect message");
            let _ = socket.send(close_frame(CLOSE_POLICY, &reason)).await;
            return;
        }
    };

    let (remote, response) =
        match tokio::time::timeout(timeout, connect_remote(request, &dial.policy)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(DialFailure::Refused(e))) => {
                tracing::debug!(session_id = %session.id(), remote = %connect.remote, error = %e, "Remote refused by policy");
                let _ = socket.send(close_frame(CLOSE_POLICY, &e.to_string())).await;
                return;
            }
            Ok(Err(DialFailure::Remote(e))) => {
                tracing::debug!(session_id = %session.id(), remote = %connect.remote, error = %e, "Remote handshake failed");
                let _ = socket.send(close_frame(CLOSE_INTERNAL, "remote handshake failed")).await;
                return;
            }
            Err(_) => {
                tracing::debug!(session_id = %session.id(), remote = %connect.remote, "Remote handshake timed out");
                let _ = socket.send(close_frame(CLOSE_INTERNAL, "remote handshake timed out")).await;
                return;
            }
        };

    let open = OpenMessage {
        kind: "open",
        protocol: response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        set_cookies: response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
    };
    let Ok(open) = serde_json::to_string(&open) else {
        return;
    };
    if socket.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    tracing::debug!(session_id = %session.id(), remote = %connect.remote, "Relay session open");
    pump(socket, remote).await;
    tracing::debug!(session_id = %session.id(), "Relay session finished");
}

/// Dial the approved addresses, then run TLS and the WebSocket handshake.
async fn connect_remote(
    request: axum::http::Request<()>,
    policy: &DestinationPolicy,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, RemoteResponse), DialFailure> {
    let uri = request.uri();
    let host = uri.host().unwrap_or_default().to_string();
    let default_port = if uri.scheme_str() == Some("wss") { 443 } else { 80 };
    let port = uri.port_u16().unwrap_or(default_port);

    let addrs = policy.resolve(&host, port).await.map_err(DialFailure::Refused)?;
    let stream = TcpStream::connect(&addrs[..])
        .await
        .map_err(|e| DialFailure::Remote(e.to_string()))?;
    tokio_tungstenite::client_async_tls(request, stream)
        .await
        .map_err(|e| DialFailure::Remote(e.to_string()))
}

async fn read_connect(socket: &mut WebSocket) -> Result<ConnectMessage, String> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                let connect: ConnectMessage =
                    serde_json::from_str(text.as_str()).map_err(|e| format!("invalid connect message: {e}"))?;
                if connect.kind != "connect" {
                    return Err(format!("unexpected message type: {}", connect.kind));
                }
                return Ok(connect);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) => return Err("expected a text connect message".to_string()),
            Some(Err(e)) => return Err(e.to_string()),
            None => return Err("client closed before connecting".to_string()),
        }
    }
}

fn build_remote_request(
    connect: &ConnectMessage,
    upgrade: &Parts,
) -> Result<axum::http::Request<()>, String> {
    let url = url::Url::parse(&connect.remote).map_err(|e| format!("invalid remote: {e}"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(format!("unsupported remote protocol '{}'", url.scheme()));
    }

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| format!("invalid remote: {e}"))?;
    let headers = request.headers_mut();

    let remote_headers = to_header_map(&connect.headers).map_err(|e| e.to_string())?;
    for (name, value) in &remote_headers {
        if is_handshake_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    for name in &connect.forward_headers {
        let name = name.to_ascii_lowercase();
        if FORBIDDEN_FORWARD_HEADERS.contains(&name.as_str()) {
            return Err(format!("forbidden forward header: {name}"));
        }
        let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        if is_handshake_header(&header_name) {
            continue;
        }
        if let Some(value) = upgrade.headers.get(&header_name) {
            headers.insert(header_name, value.clone());
        }
    }

    if !connect.protocols.is_empty() {
        let joined = connect.protocols.join(", ");
        let value = HeaderValue::from_str(&joined).map_err(|_| "invalid protocols".to_string())?;
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// Headers the handshake owns; client-supplied copies would corrupt it.
fn is_handshake_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "sec-websocket-key" | "sec-websocket-version" | "sec-websocket-extensions" | "upgrade" | "connection" | "host"
    )
}

async fn pump<S>(socket: WebSocket, remote: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut client_tx, mut client_rx) = socket.split();
    let (mut remote_tx, mut remote_rx) = remote.split();

    loop {
        tokio::select! {
            message = client_rx.next() => match message {
                Some(Ok(message)) => {
                    let closing = matches!(message, Message::Close(_));
                    if remote_tx.send(to_remote(message)).await.is_err() || closing {
                        break;
                    }
                }
                _ => {
                    let _ = remote_tx.close().await;
                    break;
                }
            },
            message = remote_rx.next() => match message {
                Some(Ok(message)) => {
                    let Some(message) = from_remote(message) else { continue };
                    let closing = matches!(message, Message::Close(_));
                    if client_tx.send(message).await.is_err() || closing {
                        break;
                    }
                }
                _ => {
                    let _ = client_tx.send(close_frame(1000, "")).await;
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bare::headers::HeaderField;

    fn upgrade_parts() -> Parts {
        let (parts, _) = axum::http::Request::builder()
            .uri("/bare/v3/")
            .header("user-agent", "test-agent")
            .header("origin", "https://app.example")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn connect(json: &str) -> ConnectMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn connect_message_parses_camel_case() {
        let message = connect(
            r#"{"type":"connect","remote":"wss://echo.example/","protocols":["chat"],"headers":{},"forwardHeaders":["user-agent"]}"#,
        );
        assert_eq!(message.kind, "connect");
        assert_eq!(message.forward_headers, vec!["user-agent".to_string()]);
    }

    #[test]
    fn remote_request_carries_headers_and_protocols() {
        let mut message = connect(
            r#"{"type":"connect","remote":"ws://echo.example/socket","protocols":["chat","v2"],"forwardHeaders":["user-agent"]}"#,
        );
        message
            .headers
            .insert("x-custom".to_string(), HeaderField::One("1".to_string()));
        let request = build_remote_request(&message, &upgrade_parts()).unwrap();
        assert_eq!(request.uri(), "ws://echo.example/socket");
        assert_eq!(request.headers()["x-custom"], "1");
        assert_eq!(request.headers()["user-agent"], "test-agent");
        assert_eq!(request.headers()["sec-websocket-protocol"], "chat, v2");
    }

    #[test]
    fn http_remote_is_rejected() {
        let message = connect(r#"{"type":"connect","remote":"https://example.com/"}"#);
        assert!(build_remote_request(&message, &upgrade_parts()).is_err());
    }

    #[test]
    fn forbidden_forward_header_is_rejected() {
        let message = connect(r#"{"type":"connect","remote":"ws://a.example/","forwardHeaders":["origin"]}"#);
        assert!(build_remote_request(&message, &upgrade_parts()).is_err());
    }

    #[tokio::test]
    async fn loopback_remote_is_refused_before_dialing() {
        let message = connect(r#"{"type":"connect","remote":"ws://127.0.0.1:9/socket"}"#);
        let request = build_remote_request(&message, &upgrade_parts()).unwrap();
        let policy = DestinationPolicy::new(false, false);
        match connect_remote(request, &policy).await {
            Err(DialFailure::Refused(PolicyError::Blocked(ip))) => assert_eq!(ip.to_string(), "127.0.0.1"),
            Err(DialFailure::Refused(e)) => panic!("unexpected refusal: {e}"),
            Err(DialFailure::Remote(e)) => panic!("dialed a blocked remote: {e}"),
            Ok(_) => panic!("connected to a blocked remote"),
        }
    }
}
