//! Relay error taxonomy and its wire form.

use std::error::Error as _;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::bare::headers::{apply_cors, X_BARE_URL};
use crate::net::PolicyError;

/// Errors reported to the client as `{code, id, message}`.
#[derive(Debug, thiserror::Error)]
pub enum BareError {
    #[error("Header was not specified.")]
    MissingHeader { id: String },

    #[error("{message}")]
    InvalidHeader { id: String, message: String },

    #[error("{message}")]
    ForbiddenHeader { id: String, message: String },

    #[error("Not found.")]
    UnknownRoute,

    #[error("Request body exceeds the relay limit.")]
    BodyTooLarge,

    #[error("The specified host could not be resolved.")]
    HostNotFound,

    #[error("The remote rejected the request.")]
    ConnectionRefused,

    #[error("The response timed out.")]
    ConnectionTimeout,

    #[error("The remote closed the connection.")]
    ConnectionReset,

    #[error("{0}")]
    Unknown(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    id: &'a str,
    message: String,
}

impl BareError {
    pub fn missing(header: &str) -> Self {
        BareError::MissingHeader {
            id: format!("request.headers.{header}"),
        }
    }

    pub fn invalid(header: &str, message: impl Into<String>) -> Self {
        BareError::InvalidHeader {
            id: format!("request.headers.{header}"),
            message: message.into(),
        }
    }

    pub fn forbidden(header: &str, message: impl Into<String>) -> Self {
        BareError::ForbiddenHeader {
            id: format!("request.headers.{header}"),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BareError::MissingHeader { .. } => "MISSING_BARE_HEADER",
            BareError::InvalidHeader { .. } => "INVALID_BARE_HEADER",
            BareError::ForbiddenHeader { .. } => "FORBIDDEN_BARE_HEADER",
            BareError::UnknownRoute => "UNKNOWN_BARE_ROUTE",
            BareError::BodyTooLarge => "BODY_TOO_LARGE",
            BareError::HostNotFound => "HOST_NOT_FOUND",
            BareError::ConnectionRefused => "CONNECTION_REFUSED",
            BareError::ConnectionTimeout => "CONNECTION_TIMEOUT",
            BareError::ConnectionReset => "CONNECTION_RESET",
            BareError::Unknown(_) => "UNKNOWN",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BareError::MissingHeader { id }
            | BareError::InvalidHeader { id, .. }
            | BareError::ForbiddenHeader { id, .. } => id,
            BareError::UnknownRoute => "request",
            BareError::BodyTooLarge => "request.body",
            BareError::HostNotFound
            | BareError::ConnectionRefused
            | BareError::ConnectionTimeout
            | BareError::ConnectionReset => "response",
            BareError::Unknown(_) => "unknown",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BareError::MissingHeader { .. }
            | BareError::InvalidHeader { .. }
            | BareError::ForbiddenHeader { .. } => StatusCode::BAD_REQUEST,
            BareError::UnknownRoute => StatusCode::NOT_FOUND,
            BareError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BareError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code(),
            id: self.id(),
            message: self.to_string(),
        };
        let mut response = (self.status(), Json(body)).into_response();
        apply_cors(response.headers_mut());
        response
    }
}

impl From<PolicyError> for BareError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Blocked(_) => BareError::forbidden(X_BARE_URL, "Destination address is not allowed."),
            PolicyError::InvalidTarget | PolicyError::Unresolvable => BareError::HostNotFound,
            PolicyError::LookupTimeout => BareError::ConnectionTimeout,
        }
    }
}

impl From<reqwest::Error> for BareError {
    fn from(e: reqwest::Error) -> Self {
        // The client resolves through the destination policy; its refusal
        // sits below the generic "dns error" wrapper.
        let mut source = e.source();
        while let Some(cause) = source {
            if let Some(refused) = cause.downcast_ref::<PolicyError>() {
                return BareError::from(refused.clone());
            }
            source = cause.source();
        }
        if e.is_timeout() {
            return BareError::ConnectionTimeout;
        }
        let mut source = e.source();
        while let Some(cause) = source {
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => return BareError::ConnectionRefused,
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                        return BareError::ConnectionReset
                    }
                    std::io::ErrorKind::TimedOut => return BareError::ConnectionTimeout,
                    _ => {}
                }
            }
            if cause.to_string().contains("dns error") {
                return BareError::HostNotFound;
            }
            source = cause.source();
        }
        BareError::Unknown(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_are_client_errors() {
        let err = BareError::missing("x-bare-url");
        assert_eq!(err.code(), "MISSING_BARE_HEADER");
        assert_eq!(err.id(), "request.headers.x-bare-url");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn remote_errors_are_server_errors() {
        assert_eq!(BareError::ConnectionRefused.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(BareError::HostNotFound.code(), "HOST_NOT_FOUND");
    }

    #[test]
    fn blocked_destination_is_forbidden_url() {
        let err = BareError::from(PolicyError::Blocked("127.0.0.1".parse().unwrap()));
        assert_eq!(err.code(), "FORBIDDEN_BARE_HEADER");
        assert_eq!(err.id(), "request.headers.x-bare-url");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(BareError::from(PolicyError::LookupTimeout).code(), "CONNECTION_TIMEOUT");
    }

    #[test]
    fn error_response_carries_cors() {
        let response = BareError::UnknownRoute.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
