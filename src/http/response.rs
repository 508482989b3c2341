//! Response helpers shared by the dispatcher and its backends.
//!
//! # Responsibilities
//! - JSON error bodies for the application API
//! - Connection-closing responses for rejected or malformed upgrades
//!
//! # Design Decisions
//! - `Connection: close` makes hyper drop the HTTP/1 connection right after
//!   the response, so a rejected socket never lingers half-open

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// `{"error": message}` with the given status.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Mark a response so the server closes the connection after sending it.
pub fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Response for an upgrade that no backend claims.
pub fn reject_connection() -> Response {
    close_connection((StatusCode::BAD_REQUEST, "No handler for this upgrade").into_response())
}
