//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal returns
//!
//! Shutdown (shutdown.rs):
//!     trigger → server stops accepting → drain within grace period → exit
//! ```
//!
//! # Design Decisions
//! - Shutdown has a deadline: tunnel sessions that outlive the grace
//!   period are dropped with the process

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
