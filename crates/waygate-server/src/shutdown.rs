//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::sse::SseManager;

/// Default grace period before remaining work is abandoned.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across the server and the SSE manager.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Full graceful sequence: cancel the token (stops the HTTP accept
    /// loop), close every SSE stream, and give the server task a bounded
    /// window to drain.
    pub async fn graceful_shutdown(
        &self,
        sse: &Arc<SseManager>,
        server_task: tokio::task::JoinHandle<()>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        sse.shutdown();

        info!(timeout_secs = timeout.as_secs(), "waiting for server to drain");
        if tokio::time::timeout(timeout, server_task).await.is_err() {
            tracing::warn!("server drain timed out");
        } else {
            info!("server shutdown complete");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseManagerConfig;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_sets_flag() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn multiple_shutdown_calls_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_closes_sse() {
        let coord = ShutdownCoordinator::new();
        let sse = Arc::new(SseManager::new(
            SseManagerConfig::default(),
            "http://localhost",
        ));
        let (_id, mut rx) = sse.connect("u@example.com").unwrap();
        let _handshake = rx.recv().await.unwrap();

        let token = coord.token();
        let server_task = tokio::spawn(async move {
            token.cancelled().await;
        });

        coord
            .graceful_shutdown(&sse, server_task, Some(Duration::from_secs(5)))
            .await;
        assert!(coord.is_shutting_down());
        assert_eq!(sse.count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let sse = Arc::new(SseManager::new(
            SseManagerConfig::default(),
            "http://localhost",
        ));
        // A task that ignores cancellation.
        let server_task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        coord
            .graceful_shutdown(&sse, server_task, Some(Duration::from_millis(50)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
