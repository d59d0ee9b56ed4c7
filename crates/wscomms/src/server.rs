//! `ServerEndpoint`: Axum HTTP + WebSocket server.
//!
//! Accepts any number of peers on one WebSocket path (default `/ws`). Every
//! peer's frames are dispatched by route to the registered receivers, and
//! every route's sender fans out to all live peers.
//!
//! Besides the WebSocket path the router serves `/health` and, when a
//! Prometheus handle is attached, `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt, future};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use wscomms_core::{Result, WsError};
use wscomms_settings::ServerSettings;

use crate::connection::Role;
use crate::connection::session::{Outgoing, WireEvent, run_session};
use crate::endpoint::{EndpointCore, Running, connection_closed, connection_opened, ctrl_c};
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::peers::PeerSet;
use crate::route::{RouteManager, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::tasks::TaskContext;

/// Shared state for Axum handlers.
#[derive(Clone)]
struct AppState {
    settings: Arc<ServerSettings>,
    routes: RouteTable,
    peers: Arc<PeerSet>,
    shutdown: Arc<ShutdownCoordinator>,
    sessions: TaskTracker,
    /// One permit per connection slot, taken before the upgrade is accepted.
    slots: Arc<Semaphore>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// `/health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"stopping"` once shutdown began.
    pub status: String,
    /// Seconds since the endpoint was created.
    pub uptime_secs: u64,
    /// Live WebSocket connections.
    pub connections: usize,
    /// Registered route paths.
    pub routes: Vec<String>,
}

/// A WebSocket server hosting any number of routes.
pub struct ServerEndpoint {
    settings: Arc<ServerSettings>,
    core: EndpointCore,
    metrics: Option<PrometheusHandle>,
    slots: Arc<Semaphore>,
    start_time: Instant,
}

impl ServerEndpoint {
    /// Server bound to `host:port` with default settings otherwise.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_settings(ServerSettings {
            host: host.into(),
            port,
            ..ServerSettings::default()
        })
    }

    /// Server with explicit settings.
    pub fn with_settings(settings: ServerSettings) -> Self {
        let slots = settings.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            settings: Arc::new(settings),
            core: EndpointCore::new(Role::Server),
            metrics: None,
            slots: Arc::new(Semaphore::new(slots)),
            start_time: Instant::now(),
        }
    }

    /// Serve the given Prometheus handle at `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Effective settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Register a route. See [`RouteTable::register`].
    pub fn add_route_handler(&self, path: &str, manager: RouteManager) -> Result<()> {
        self.core.add_route_handler(path, manager)
    }

    /// Register a task to run alongside the server once it starts.
    pub fn add_background_task<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.core.add_background_task(name, task);
    }

    /// Registered routes.
    pub fn routes(&self) -> &RouteTable {
        &self.core.routes
    }

    /// Live connections.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.core.peers
    }

    /// Handle that stops the server from anywhere, e.g. a background task.
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.core.shutdown.clone()
    }

    /// Build the Axum router without binding a listener.
    ///
    /// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
    /// the WebSocket handler needs the peer address.
    ///
    /// Fails with [`WsError::InvalidRoute`] when the configured WebSocket
    /// path is malformed or collides with `/health` or `/metrics`.
    pub fn router(&self) -> Result<Router> {
        if let Some(problem) = self.settings.path_problem() {
            return Err(WsError::InvalidRoute(format!("websocket path {problem}")));
        }
        Ok(build_router(AppState {
            settings: self.settings.clone(),
            routes: self.core.routes.clone(),
            peers: self.core.peers.clone(),
            shutdown: self.core.shutdown.clone(),
            sessions: self.core.sessions.clone(),
            slots: self.slots.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }))
    }

    /// Bind, start serving and launch background tasks.
    pub async fn start(self) -> Result<ServerHandle> {
        let app = self.router()?;
        let listener =
            TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await?;
        let local_addr = listener.local_addr()?;
        let shutdown_timeout = Duration::from_millis(self.settings.shutdown_timeout_ms);
        let path = self.settings.path.clone();

        let running = self.core.launch();
        let serve = spawn_serve(listener, app, running.shutdown.clone());
        info!(%local_addr, path, routes = ?running.routes.paths(), "server listening");

        Ok(ServerHandle {
            local_addr,
            running,
            serve,
            shutdown_timeout,
        })
    }

    /// Start, then serve until Ctrl-C or [`ShutdownCoordinator::shutdown`].
    pub async fn run(self) -> Result<()> {
        let handle = self.start().await?;
        let shutdown = handle.shutdown_handle();
        tokio::select! {
            () = shutdown.wait() => {}
            () = ctrl_c() => {}
        }
        handle.stop().await
    }
}

/// A started server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    running: Running,
    serve: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a route while the server is running.
    pub fn add_route_handler(&self, path: &str, manager: RouteManager) -> Result<()> {
        self.running.routes.register(path, manager)
    }

    /// Registered routes.
    pub fn routes(&self) -> &RouteTable {
        &self.running.routes
    }

    /// Live connections.
    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.running.peers
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.running.peers.len().await
    }

    /// Handle that stops the server from anywhere.
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.running.shutdown.clone()
    }

    /// Stop accepting, close every connection and receiver, and wait for
    /// background tasks (bounded by `shutdownTimeoutMs`).
    pub async fn stop(self) -> Result<()> {
        self.running
            .stop(vec![self.serve], self.shutdown_timeout)
            .await;
        Ok(())
    }
}

fn spawn_serve(
    listener: TcpListener,
    app: Router,
    shutdown: Arc<ShutdownCoordinator>,
) -> JoinHandle<()> {
    let token: CancellationToken = shutdown.token();
    tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(token.cancelled_owned())
        .await;
        if let Err(e) = served {
            error!(error = %e, "server stopped with error");
            shutdown.shutdown();
        }
    })
}

fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route(&state.settings.path, get(ws_handler))
        .route("/health", get(health_handler));
    if state.metrics.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }
    router.with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.shutdown.is_shutting_down() {
        "stopping"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.into(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.peers.len().await,
        routes: state.routes.paths(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is stopping").into_response();
    }
    let Some(slot) = reserve_slot(&state.slots) else {
        warn!(%addr, max = state.settings.max_connections, "rejecting connection, server full");
        counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let sessions = state.sessions.clone();
    ws.max_message_size(state.settings.max_message_size)
        .on_upgrade(move |socket| sessions.track_future(handle_socket(socket, addr, state, slot)))
}

/// Claim a connection slot. The permit is held until the session ends, or
/// released with the upgrade callback if the upgrade never completes.
fn reserve_slot(slots: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    slots.clone().try_acquire_owned().ok()
}

async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    state: AppState,
    _slot: OwnedSemaphorePermit,
) {
    let (connection, outbound) = connection_opened(
        &state.peers,
        Some(addr),
        state.settings.outbound_buffer,
        &state.shutdown,
    )
    .await;

    let (sink, stream) = socket.split();
    let stream = stream.map(|frame| frame.map(WireEvent::from));
    let sink = sink.with(|out: Outgoing| future::ready(Ok::<_, axum::Error>(AxumMessage::from(out))));

    let end = run_session(
        connection.clone(),
        stream,
        sink,
        outbound,
        state.routes.clone(),
        &state.settings.heartbeat,
    )
    .await;

    connection_closed(&state.peers, &connection, &end).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
