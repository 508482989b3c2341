//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;

/// Broadcasts a single stop request to every long-running task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    grace: Duration,
}

impl Shutdown {
    pub fn new(grace: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, grace }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        tracing::info!(grace_secs = self.grace.as_secs(), "Shutdown triggered");
        let _ = self.tx.send(());
    }

    /// How long draining may take before the process exits anyway.
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Await `task`, giving up once the grace period has passed.
    pub async fn drain<F: std::future::Future>(&self, task: F) -> Option<F::Output> {
        match tokio::time::timeout(self.grace, task).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::warn!(grace_secs = self.grace.as_secs(), "Drain deadline passed, forcing exit");
                None
            }
        }
    }
}
