//! State and lifecycle shared by client and server endpoints.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use wscomms_core::Result;

use crate::connection::session::SessionEnd;
use crate::connection::{Connection, ConnectionState, Role};
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL,
};
use crate::peers::PeerSet;
use crate::route::{RouteManager, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::tasks::{BackgroundTask, TaskContext, spawn_all};

/// Routes, peers, pending tasks and the shutdown token of one endpoint.
pub(crate) struct EndpointCore {
    pub(crate) routes: RouteTable,
    pub(crate) peers: Arc<PeerSet>,
    pub(crate) tasks: Vec<BackgroundTask>,
    pub(crate) shutdown: Arc<ShutdownCoordinator>,
    pub(crate) sessions: TaskTracker,
}

impl EndpointCore {
    pub(crate) fn new(role: Role) -> Self {
        let peers = Arc::new(PeerSet::new(role));
        Self {
            routes: RouteTable::new(peers.clone()),
            peers,
            tasks: Vec::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sessions: TaskTracker::new(),
        }
    }

    pub(crate) fn add_route_handler(&self, path: &str, manager: RouteManager) -> Result<()> {
        self.routes.register(path, manager)
    }

    pub(crate) fn add_background_task<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(BackgroundTask::new(name, task));
    }

    /// Spawn the registered background tasks and switch to the running state.
    pub(crate) fn launch(self) -> Running {
        let token = self.shutdown.token();
        let names: Vec<&str> = self.tasks.iter().map(BackgroundTask::name).collect();
        if !names.is_empty() {
            info!(tasks = ?names, "starting background tasks");
        }
        let tasks = spawn_all(self.tasks, &token);
        Running {
            routes: self.routes,
            peers: self.peers,
            shutdown: self.shutdown,
            tasks,
            sessions: self.sessions,
        }
    }
}

/// A started endpoint: everything `stop` has to tear down.
pub(crate) struct Running {
    pub(crate) routes: RouteTable,
    pub(crate) peers: Arc<PeerSet>,
    pub(crate) shutdown: Arc<ShutdownCoordinator>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    /// Connection sessions spawned by the endpoint.
    pub(crate) sessions: TaskTracker,
}

impl Running {
    /// Stop the endpoint.
    ///
    /// Cancels the shared token (closing every connection and background
    /// task), closes all receivers so pending `receive()` calls return, then
    /// waits up to `timeout` for `extra` handles, the background tasks and
    /// the connection sessions.
    pub(crate) async fn stop(self, extra: Vec<JoinHandle<()>>, timeout: Duration) {
        let Self {
            routes,
            peers: _,
            shutdown,
            mut tasks,
            sessions,
        } = self;

        info!("stopping endpoint");
        shutdown.shutdown();
        routes.close_receivers();
        sessions.close();

        tasks.extend(extra);
        let aborted = shutdown.graceful_shutdown(tasks, Some(timeout)).await;
        if tokio::time::timeout(timeout, sessions.wait()).await.is_err() {
            warn!(
                remaining = sessions.len(),
                "connection sessions still running after shutdown timeout"
            );
        }
        info!(aborted, "endpoint stopped");
    }
}

/// Create an open connection and add it to `peers`.
///
/// Returns the connection and the outbound channel its writer task drains.
pub(crate) async fn connection_opened(
    peers: &PeerSet,
    remote_addr: Option<SocketAddr>,
    outbound_buffer: usize,
    shutdown: &ShutdownCoordinator,
) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
    let role = peers.role();
    let (tx, rx) = mpsc::channel(outbound_buffer.max(1));
    let connection = Arc::new(Connection::new(role, remote_addr, tx, &shutdown.token()));
    let _ = connection.transition(ConnectionState::Open);
    peers.add(connection.clone()).await;

    info!(conn_id = %connection.id(), remote = ?remote_addr, role = %role, "connection opened");
    counter!(CONNECTIONS_TOTAL, "role" => role.as_str()).increment(1);
    gauge!(CONNECTIONS_ACTIVE, "role" => role.as_str()).increment(1.0);
    (connection, rx)
}

/// Remove a finished connection from `peers` and record why it ended.
pub(crate) async fn connection_closed(peers: &PeerSet, connection: &Connection, end: &SessionEnd) {
    let role = connection.role();
    let _ = peers.remove(connection.id()).await;

    info!(
        conn_id = %connection.id(),
        reason = end.as_str(),
        state = ?connection.state(),
        "connection closed"
    );
    counter!(DISCONNECTIONS_TOTAL, "role" => role.as_str(), "reason" => end.as_str()).increment(1);
    gauge!(CONNECTIONS_ACTIVE, "role" => role.as_str()).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS, "role" => role.as_str())
        .record(connection.age().as_secs_f64());
}

/// Resolve on Ctrl-C. If the signal handler cannot be installed, never resolve.
pub(crate) async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(e) => {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
