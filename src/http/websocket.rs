//! WebSocket plumbing shared by the tunnel backends.
//!
//! # Responsibilities
//! - Complete the upgrade handshake for a request already routed to a backend
//! - Convert frames between the server socket and outbound client sockets
//!
//! # Data Flow
//! ```text
//! Client ←──── axum WebSocket ────→ backend ←──── tungstenite ────→ Remote
//! ```
//!
//! # Design Decisions
//! - Frame-level forwarding (no message buffering)
//! - Close frames propagated in both directions
//! - Malformed handshakes close the connection like any rejected upgrade

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as RemoteCloseFrame;
use tokio_tungstenite::tungstenite::Message as RemoteMessage;

use crate::http::response::close_connection;

/// Extract the upgrade handle from a routed request.
///
/// On a malformed handshake, returns the response that closes the connection.
pub async fn upgrade(req: Request<Body>) -> Result<(WebSocketUpgrade, axum::http::request::Parts), Response> {
    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => Ok((ws, parts)),
        Err(rejection) => {
            tracing::debug!(path = %parts.uri.path(), error = %rejection, "Malformed WebSocket handshake");
            Err(close_connection(rejection.into_response()))
        }
    }
}

/// Client frame → remote frame.
pub fn to_remote(message: Message) -> RemoteMessage {
    match message {
        Message::Text(text) => RemoteMessage::text(text.as_str().to_owned()),
        Message::Binary(bytes) => RemoteMessage::Binary(bytes),
        Message::Ping(bytes) => RemoteMessage::Ping(bytes),
        Message::Pong(bytes) => RemoteMessage::Pong(bytes),
        Message::Close(frame) => RemoteMessage::Close(frame.map(|f| RemoteCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Remote frame → client frame. Raw frames have no client equivalent.
pub fn from_remote(message: RemoteMessage) -> Option<Message> {
    match message {
        RemoteMessage::Text(text) => Some(Message::Text(text.as_str().to_owned().into())),
        RemoteMessage::Binary(bytes) => Some(Message::Binary(bytes)),
        RemoteMessage::Ping(bytes) => Some(Message::Ping(bytes)),
        RemoteMessage::Pong(bytes) => Some(Message::Pong(bytes)),
        RemoteMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
        RemoteMessage::Frame(_) => None,
    }
}

/// Close frame with a code and reason.
pub fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_close_frames_convert() {
        let remote = to_remote(Message::Text("hello".into()));
        assert_eq!(remote, RemoteMessage::text("hello"));

        let back = from_remote(RemoteMessage::Close(Some(RemoteCloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        })));
        match back {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
