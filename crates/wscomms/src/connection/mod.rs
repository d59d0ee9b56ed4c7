//! One live WebSocket link and the tasks that drive it.
//!
//! A [`Connection`] is shared state: identity, lifecycle state, the outbound
//! channel into its writer task, and liveness bookkeeping. The session loop in
//! [`session`] owns the socket halves and drives reads and writes.

pub(crate) mod dispatch;
pub(crate) mod heartbeat;
pub(crate) mod session;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wscomms_core::{ConnectionId, Result, WsError};

/// Which side of the link an endpoint is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dials out to a server; at most one open connection at a time.
    Client,
    /// Accepts any number of connections.
    Server,
}

impl Role {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a connection.
///
/// `Connecting → Open → Closing → Closed`, with `Failed` reachable from any
/// non-terminal state. `Closed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting = 0,
    /// Frames may flow in both directions.
    Open = 1,
    /// A close was requested; no new outbound frames are accepted.
    Closing = 2,
    /// Closed cleanly.
    Closed = 3,
    /// Closed by a transport error or heartbeat timeout.
    Failed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (Self::Connecting, Self::Open)
            | (Self::Connecting | Self::Open, Self::Closing)
            | (Self::Closing, Self::Closed)
            | (_, Self::Failed) => true,
            _ => false,
        }
    }
}

/// A connected peer.
pub struct Connection {
    id: ConnectionId,
    role: Role,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    opened: Instant,
    state: AtomicU8,
    /// Send channel to the connection's writer task.
    tx: mpsc::Sender<Arc<str>>,
    /// Cancelled when the connection should close. Child of the endpoint token.
    close: CancellationToken,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    unrouted: AtomicU64,
    decode_errors: AtomicU64,
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::Sender<Arc<str>>,
        endpoint_token: &CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            role,
            remote_addr,
            connected_at: Utc::now(),
            opened: now,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            tx,
            close: endpoint_token.child_token(),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            unrouted: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Role of the endpoint that owns this connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer socket address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Wall-clock time the connection opened.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether outbound frames are accepted.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                ConnectionState::from_u8(current)
                    .can_transition_to(next)
                    .then_some(next as u8)
            })
            .is_ok()
    }

    /// Queue one encoded frame for the writer task.
    ///
    /// Waits for room in the outbound buffer. Fails with
    /// [`WsError::NotConnected`] once the connection has left `Open`.
    pub async fn send_text(&self, text: Arc<str>) -> Result<()> {
        if !self.is_open() {
            return Err(WsError::NotConnected);
        }
        self.tx.send(text).await.map_err(|_| WsError::NotConnected)
    }

    /// Request a graceful close. The session loop sends a close frame and
    /// finishes the state transition.
    pub fn close(&self) {
        let _ = self.transition(ConnectionState::Closing);
        self.close.cancel();
    }

    /// Token cancelled when this connection should close.
    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.close
    }

    /// Mark the connection as alive (pong or any inbound frame received).
    pub(crate) fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub(crate) fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag. Returns `true` if the peer was heard
    /// from since the last check.
    pub(crate) fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn record_unrouted(&self) {
        let _ = self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_error(&self) {
        let _ = self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound frames that named an unregistered route.
    pub fn unrouted_count(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Inbound frames that could not be decoded.
    pub fn decode_error_count(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// An open server-side connection plus the receiving end of its outbound channel.
    pub(crate) fn open_connection(
        buffer: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let conn = Connection::new(Role::Server, None, tx, &CancellationToken::new());
        assert!(conn.transition(ConnectionState::Open));
        (Arc::new(conn), rx)
    }

    #[test]
    fn new_connection_is_connecting() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(Role::Client, None, tx, &CancellationToken::new());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_open());
        assert!(conn.id().as_str().starts_with("conn_"));
    }

    #[test]
    fn lifecycle_transitions() {
        let (conn, _rx) = open_connection(1);
        assert!(conn.is_open());
        assert!(!conn.transition(ConnectionState::Connecting));
        assert!(conn.transition(ConnectionState::Closing));
        assert!(conn.transition(ConnectionState::Closed));
        // terminal
        assert!(!conn.transition(ConnectionState::Open));
        assert!(!conn.transition(ConnectionState::Failed));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn failed_is_reachable_from_open() {
        let (conn, _rx) = open_connection(1);
        assert!(conn.transition(ConnectionState::Failed));
        assert!(conn.state().is_terminal());
    }

    #[tokio::test]
    async fn send_text_reaches_channel() {
        let (conn, mut rx) = open_connection(4);
        conn.send_text(Arc::from("hello")).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_after_close_is_not_connected() {
        let (conn, _rx) = open_connection(4);
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.close_token().is_cancelled());
        assert_matches!(
            conn.send_text(Arc::from("x")).await,
            Err(WsError::NotConnected)
        );
    }

    #[tokio::test]
    async fn send_to_dropped_writer_is_not_connected() {
        let (conn, rx) = open_connection(4);
        drop(rx);
        assert_matches!(
            conn.send_text(Arc::from("x")).await,
            Err(WsError::NotConnected)
        );
    }

    #[test]
    fn endpoint_cancel_closes_connection_token() {
        let endpoint = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new(Role::Server, None, tx, &endpoint);
        endpoint.cancel();
        assert!(conn.close_token().is_cancelled());
    }

    #[test]
    fn alive_flag_resets_on_check() {
        let (conn, _rx) = open_connection(1);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn counters() {
        let (conn, _rx) = open_connection(1);
        conn.record_unrouted();
        conn.record_unrouted();
        conn.record_decode_error();
        assert_eq!(conn.unrouted_count(), 2);
        assert_eq!(conn.decode_error_count(), 1);
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::Client.to_string(), "client");
        assert_eq!(Role::Server.as_str(), "server");
    }
}
