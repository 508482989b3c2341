//! Network session bookkeeping and outbound destination policy.
//!
//! # Data Flow
//! ```text
//! Upgrade handed to a tunnel backend
//!     → connection.rs (session id, live count)
//!     → backend runs the session
//!     → guard dropped: count decremented
//! ```
//!
//! # Design Decisions
//! - Counting is lock-free (atomics)
//! - Guards decrement on drop, so panicking sessions are still released
//! - Both tunnel backends dial through the same policy.rs checks

pub mod connection;
pub mod policy;

pub use connection::{SessionGuard, SessionId, SessionKind, SessionTracker};
pub use policy::{DestinationPolicy, PolicyError};
