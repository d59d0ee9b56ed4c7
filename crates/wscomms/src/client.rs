//! `ClientEndpoint`: dials one server and keeps the link up.
//!
//! The client holds at most one open connection. When it drops, the link task
//! reconnects with exponential backoff; senders fail fast with
//! [`WsError::NotConnected`] in the meantime and resume transparently once the
//! link is back. Exhausting the retry budget stops the endpoint and surfaces
//! [`WsError::ReconnectExhausted`] from [`ClientHandle::stop`] / [`ClientEndpoint::run`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt, future};
use metrics::counter;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as TungMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use wscomms_core::retry::{backoff_delay, retries_exhausted};
use wscomms_core::{Result, WsError};
use wscomms_settings::ClientSettings;

use crate::connection::session::{Outgoing, SessionEnd, WireEvent, run_session};
use crate::connection::{Connection, Role};
use crate::endpoint::{EndpointCore, Running, connection_closed, connection_opened, ctrl_c};
use crate::metrics::RECONNECT_ATTEMPTS_TOTAL;
use crate::peers::PeerSet;
use crate::route::{RouteManager, RouteTable};
use crate::shutdown::ShutdownCoordinator;
use crate::tasks::TaskContext;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket client hosting any number of routes over one connection.
pub struct ClientEndpoint {
    settings: Arc<ClientSettings>,
    core: EndpointCore,
}

impl ClientEndpoint {
    /// Client dialing `ws://host:port/ws` with default settings otherwise.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_settings(ClientSettings {
            host: host.into(),
            port,
            ..ClientSettings::default()
        })
    }

    /// Client with explicit settings.
    pub fn with_settings(settings: ClientSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            core: EndpointCore::new(Role::Client),
        }
    }

    /// Effective settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Register a route. See [`RouteTable::register`].
    pub fn add_route_handler(&self, path: &str, manager: RouteManager) -> Result<()> {
        self.core.add_route_handler(path, manager)
    }

    /// Register a task to run alongside the client once it starts.
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

    /// Handle that stops the client from anywhere, e.g. a background task.
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.core.shutdown.clone()
    }

    /// Launch background tasks and the link task.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background.
    pub async fn start(self) -> Result<ClientHandle> {
        let shutdown_timeout = Duration::from_millis(self.settings.shutdown_timeout_ms);
        let running = self.core.launch();
        let failure = Arc::new(Mutex::new(None));

        let link = {
            let link = Link {
                settings: self.settings.clone(),
                routes: running.routes.clone(),
                peers: running.peers.clone(),
                shutdown: running.shutdown.clone(),
            };
            let failure = failure.clone();
            tokio::spawn(async move {
                if let Err(e) = link.maintain().await {
                    error!(error = %e, "client link failed, stopping");
                    *failure.lock() = Some(e);
                    link.shutdown.shutdown();
                }
            })
        };
        info!(url = %self.settings.url(), "client started");

        Ok(ClientHandle {
            running,
            link,
            failure,
            shutdown_timeout,
        })
    }

    /// Start, then run until Ctrl-C, [`ShutdownCoordinator::shutdown`] or a
    /// fatal link failure.
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

/// A started client.
pub struct ClientHandle {
    running: Running,
    link: JoinHandle<()>,
    failure: Arc<Mutex<Option<WsError>>>,
    shutdown_timeout: Duration,
}

impl ClientHandle {
    /// The open connection, if the link is up.
    pub async fn connection(&self) -> Option<Arc<Connection>> {
        self.running.peers.first_open().await
    }

    /// Whether the link is up.
    pub async fn is_connected(&self) -> bool {
        self.connection().await.is_some()
    }

    /// Register a route while the client is running.
    pub fn add_route_handler(&self, path: &str, manager: RouteManager) -> Result<()> {
        self.running.routes.register(path, manager)
    }

    /// Registered routes.
    pub fn routes(&self) -> &RouteTable {
        &self.running.routes
    }

    /// Handle that stops the client from anywhere.
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        self.running.shutdown.clone()
    }

    /// Close the link, every receiver and background task.
    ///
    /// Returns the link's fatal error, if it failed before the stop.
    pub async fn stop(self) -> Result<()> {
        self.running
            .stop(vec![self.link], self.shutdown_timeout)
            .await;
        match self.failure.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Everything the link task needs.
struct Link {
    settings: Arc<ClientSettings>,
    routes: RouteTable,
    peers: Arc<PeerSet>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl Link {
    /// Connect, run the session, reconnect; until shutdown or the retry
    /// budget runs out.
    async fn maintain(&self) -> Result<()> {
        let url = self.settings.url();
        let token = self.shutdown.token();
        let reconnect = &self.settings.reconnect;
        let max_retries = if reconnect.enabled {
            reconnect.max_retries
        } else {
            Some(0)
        };
        let connect_timeout = Duration::from_millis(self.settings.connect_timeout_ms.max(1));
        let mut failures: u32 = 0;

        loop {
            let attempt = tokio::select! {
                () = token.cancelled() => return Ok(()),
                result = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => result,
            };

            match attempt {
                Ok(Ok((socket, _response))) => {
                    if failures > 0 {
                        info!(%url, failed_attempts = failures, "reconnected");
                    }
                    failures = 0;
                    let end = self.run_connection(socket).await;
                    if token.is_cancelled() {
                        return Ok(());
                    }
                    warn!(%url, reason = end.as_str(), "connection lost");
                    if !reconnect.enabled {
                        info!("reconnection disabled, stopping client");
                        self.shutdown.shutdown();
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    failures = failures.saturating_add(1);
                    warn!(%url, attempt = failures, error = %e, "connect failed");
                }
                Err(_) => {
                    failures = failures.saturating_add(1);
                    warn!(%url, attempt = failures, timeout = ?connect_timeout, "connect timed out");
                }
            }

            if retries_exhausted(failures, max_retries) {
                return Err(WsError::ReconnectExhausted { attempts: failures });
            }

            let delay = backoff_delay(
                failures.saturating_sub(1),
                reconnect.base_delay_ms,
                reconnect.max_delay_ms,
                reconnect.jitter_factor,
                rand::random::<f64>(),
            );
            counter!(RECONNECT_ATTEMPTS_TOTAL).increment(1);
            debug!(delay = ?delay, "reconnecting after delay");
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_connection(&self, socket: Socket) -> SessionEnd {
        let remote_addr = match socket.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
            _ => None,
        };
        let (connection, outbound) = connection_opened(
            &self.peers,
            remote_addr,
            self.settings.outbound_buffer,
            &self.shutdown,
        )
        .await;

        let (sink, stream) = socket.split();
        let stream = stream.map(|frame| frame.map(WireEvent::from));
        let sink = sink
            .with(|out: Outgoing| future::ready(Ok::<_, tungstenite::Error>(TungMessage::from(out))));

        let end = run_session(
            connection.clone(),
            stream,
            sink,
            outbound,
            self.routes.clone(),
            &self.settings.heartbeat,
        )
        .await;

        connection_closed(&self.peers, &connection, &end).await;
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{Receiver, Sender};
    use assert_matches::assert_matches;
    use wscomms_core::Message;
    use wscomms_settings::ReconnectSettings;

    /// A port nothing is listening on.
    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fast_settings(port: u16, max_retries: Option<u32>) -> ClientSettings {
        ClientSettings {
            host: "127.0.0.1".into(),
            port,
            connect_timeout_ms: 500,
            reconnect: ReconnectSettings {
                base_delay_ms: 5,
                max_delay_ms: 20,
                max_retries,
                ..ReconnectSettings::default()
            },
            ..ClientSettings::default()
        }
    }

    #[test]
    fn new_targets_default_path() {
        let client = ClientEndpoint::new("localhost", 8080);
        assert_eq!(client.settings().url(), "ws://localhost:8080/ws");
    }

    #[tokio::test]
    async fn exhausted_retries_are_fatal() {
        let client = ClientEndpoint::with_settings(fast_settings(closed_port().await, Some(2)));
        let result = tokio::time::timeout(Duration::from_secs(10), client.run())
            .await
            .expect("run should give up");
        assert_matches!(result, Err(WsError::ReconnectExhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn send_while_disconnected_is_not_connected() {
        let client = ClientEndpoint::with_settings(fast_settings(closed_port().await, None));
        let sender = Sender::new("default_sender");
        client
            .add_route_handler("/test_route", RouteManager::new(Receiver::new(true), sender.clone()))
            .unwrap();
        let handle = client.start().await.unwrap();
        assert!(!handle.is_connected().await);
        assert_matches!(
            sender
                .send(Message::new("welcome", "Hello from client").unwrap())
                .await,
            Err(WsError::NotConnected)
        );
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_background_tasks() {
        let mut client = ClientEndpoint::with_settings(fast_settings(closed_port().await, None));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        client.add_background_task("idle", move |_ctx| async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        let handle = client.start().await.unwrap();
        handle.stop().await.unwrap();
        // the task future was dropped along with its sender
        assert!(rx.await.is_err());
    }
}
