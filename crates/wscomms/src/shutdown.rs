//! Endpoint shutdown: one `CancellationToken` plus bounded joins of spawned work.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before remaining tasks are aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinates graceful shutdown across all tasks of one endpoint.
///
/// Every connection token and background-task token is derived from this
/// one, so a single [`shutdown`](Self::shutdown) reaches all of them.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator with a fresh, uncancelled token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The endpoint-wide token. Connections and background tasks hold children of it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until a shutdown is initiated.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Shut down and wait for `handles`.
    ///
    /// 1. Cancel the shutdown token (signals all tasks)
    /// 2. Wait up to `timeout` for all handles to complete
    /// 3. Abort whatever is still running
    ///
    /// Returns the number of tasks that had to be aborted.
    pub async fn graceful_shutdown<T>(
        &self,
        handles: Vec<JoinHandle<T>>,
        timeout: Option<Duration>,
    ) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);

        match tokio::time::timeout(timeout, drain).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(Result::err) {
                    if e.is_panic() {
                        warn!(error = %e, "task panicked during shutdown");
                    }
                }
                0
            }
            Err(_) => {
                let stragglers = aborts.iter().filter(|a| !a.is_finished()).count();
                warn!(stragglers, "shutdown timed out after {timeout:?}, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
                stragglers
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
