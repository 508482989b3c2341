//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, dispatch)
//!     → request.rs (request ID assigned and echoed)
//!     → [routing layer decides backend]
//!     → api.rs / static mounts (application)
//!     → websocket.rs (handshake for tunnel backends)
//!     → response.rs (JSON errors, connection-closing rejects)
//!     → Send to client
//! ```

pub mod api;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
