//! Tunnel session lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique session IDs for tracing
//! - Count live long-lived sessions (wisp, bare WebSocket relays)
//! - Report per-kind counts to health and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Global atomic counter for session IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Kind of long-lived session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Wisp,
    BareWebSocket,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Wisp => "wisp",
            SessionKind::BareWebSocket => "bare_ws",
        }
    }
}

/// Counts live sessions per kind.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    wisp: Arc<AtomicU64>,
    bare: Arc<AtomicU64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, kind: SessionKind) -> &Arc<AtomicU64> {
        match kind {
            SessionKind::Wisp => &self.wisp,
            SessionKind::BareWebSocket => &self.bare,
        }
    }

    /// Record a new session. Returns a guard that decrements on drop.
    pub fn track(&self, kind: SessionKind) -> SessionGuard {
        let counter = Arc::clone(self.counter(kind));
        let active = counter.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_sessions(kind.as_str(), active);
        let id = SessionId::new();
        tracing::debug!(session_id = %id, kind = kind.as_str(), "Session opened");
        SessionGuard { counter, kind, id }
    }

    pub fn active(&self, kind: SessionKind) -> u64 {
        self.counter(kind).load(Ordering::SeqCst)
    }

    pub fn total_active(&self) -> u64 {
        self.active(SessionKind::Wisp) + self.active(SessionKind::BareWebSocket)
    }
}

/// Guard that tracks a session's lifetime.
#[derive(Debug)]
pub struct SessionGuard {
    counter: Arc<AtomicU64>,
    kind: SessionKind,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let active = self.counter.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_sessions(self.kind.as_str(), active);
        tracing::debug!(session_id = %self.id, kind = self.kind.as_str(), "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn session_tracker_counts_per_kind() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.total_active(), 0);

        let wisp = tracker.track(SessionKind::Wisp);
        let bare = tracker.track(SessionKind::BareWebSocket);
        assert_eq!(tracker.active(SessionKind::Wisp), 1);
        assert_eq!(tracker.total_active(), 2);

        drop(wisp);
        assert_eq!(tracker.active(SessionKind::Wisp), 0);
        assert_eq!(tracker.active(SessionKind::BareWebSocket), 1);

        drop(bare);
        assert_eq!(tracker.total_active(), 0);
    }
}
