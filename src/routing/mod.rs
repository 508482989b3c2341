//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming event (method, path, headers)
//!     → router.rs (InboundEvent::of: HTTP or upgrade)
//!     → matcher.rs (evaluate predicates in priority order)
//!     → Return: RouteDecision
//!
//! Table construction (at startup):
//!     RoutingConfig + tunnel-control predicate
//!     → Freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Table built at startup, immutable at runtime
//! - No regex in hot path (prefix/suffix matching only)
//! - Deterministic: same input always yields the same decision
//! - First match wins

pub mod matcher;
pub mod router;

pub use matcher::{is_websocket_upgrade, Matcher, PathPrefixMatcher, PathSuffixMatcher};
pub use router::{InboundEvent, RouteDecision, Router};
