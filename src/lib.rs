//! Proxy browser server library.
//!
//! One listener serves the browser UI, the rewriting-engine bundles, the
//! bare relay (`/bare/`) and the wisp transport (`…/wisp/`). The client-side
//! logic of the UI (search resolution, preferences, proxied URL building) is
//! exposed as plain library modules.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Tunnel backends
pub mod bare;
pub mod wisp;

// Client-side logic
pub mod engine;
pub mod search;
pub mod settings;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
