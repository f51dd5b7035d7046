//! Signal-driven shutdown coordination.
//!
//! A [`CancellationToken`] carries the shutdown flag: every long-running
//! `.await` in the Acceptor and Worker races against one via
//! `tokio::select!`, so shutdown is observed cooperatively rather than
//! forced.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bounded wait for outstanding workers to drain.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Owns the instance's shutdown signal and drives the drain sequence.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a fresh, uncancelled shutdown controller.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The token to be cloned into every component that must observe
    /// shutdown (Acceptor, Worker read loop, TLS handshake).
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Requests shutdown directly, bypassing the OS signal handler. Used by
    /// tests and by embedders that want programmatic control.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Spawns the task that listens for `SIGINT`/`SIGTERM` (or, off Unix,
    /// `Ctrl+C`) and cancels the shared token.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    /// Waits, with a bounded timeout, for every outstanding worker permit to
    /// be returned — i.e. for the tracked worker count to reach zero.
    /// Proceeds regardless once the timeout elapses.
    pub async fn drain_workers(&self, worker_permits: &Arc<Semaphore>, capacity: u32) {
        let wait_for_all = async {
            let _ = worker_permits.acquire_many(capacity).await;
        };
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, wait_for_all)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = WORKER_DRAIN_TIMEOUT.as_secs(),
                "worker drain timed out; shutting down with workers still active"
            );
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_cancels_the_token() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_shutting_down());
        shutdown.request();
        assert!(shutdown.is_shutting_down());
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn drain_returns_once_all_permits_are_returned() {
        let permits = Arc::new(Semaphore::new(4));
        let shutdown = Shutdown::new();
        let permit = permits.clone().acquire_owned().await.unwrap();
        let permits_for_drain = permits.clone();
        let drain = tokio::spawn(async move {
            shutdown.drain_workers(&permits_for_drain, 4).await;
        });
        drop(permit);
        drain.await.unwrap();
    }
}
