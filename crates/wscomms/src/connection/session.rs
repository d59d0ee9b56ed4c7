//! Connection session loop, shared by both endpoint roles.
//!
//! The server (axum) and client (tokio-tungstenite) each adapt their socket
//! halves to a stream of [`WireEvent`] and a sink of [`Outgoing`], then hand
//! them to [`run_session`]:
//!
//! 1. A writer task forwards queued frames, sends periodic pings and tracks
//!    peer liveness
//! 2. The read loop dispatches data frames to route receivers
//! 3. On close, error or heartbeat timeout both halves are torn down and the
//!    connection reaches a terminal state

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};
use wscomms_settings::HeartbeatSettings;

use super::dispatch::{Payload, dispatch};
use super::heartbeat::{HeartbeatMonitor, Liveness};
use super::{Connection, ConnectionState};
use crate::route::RouteTable;

/// How long the writer gets to flush and send a close frame before it is aborted.
const WRITER_GRACE: Duration = Duration::from_secs(2);

/// Inbound frame, independent of the WebSocket library.
#[derive(Debug)]
pub(crate) enum WireEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
    Other,
}

/// Outbound frame, independent of the WebSocket library.
#[derive(Debug)]
pub(crate) enum Outgoing {
    Text(Arc<str>),
    Ping,
    Close,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    /// Closed from this side (connection close or endpoint shutdown).
    LocalClose,
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// The peer stopped answering pings.
    HeartbeatTimeout,
    /// A read or write failed.
    Transport(String),
}

impl SessionEnd {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::LocalClose => "local_close",
            Self::PeerClosed => "peer_closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Transport(_) => "transport_error",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::HeartbeatTimeout | Self::Transport(_))
    }

    fn from_writer(result: Result<Self, JoinError>) -> Self {
        result.unwrap_or_else(|e| Self::Transport(format!("writer task failed: {e}")))
    }
}

/// Drive one open connection until it closes.
#[instrument(skip_all, fields(conn_id = %connection.id(), role = %connection.role()))]
pub(crate) async fn run_session<St, E, Si>(
    connection: Arc<Connection>,
    mut stream: St,
    sink: Si,
    outbound: mpsc::Receiver<Arc<str>>,
    routes: RouteTable,
    heartbeat: &HeartbeatSettings,
) -> SessionEnd
where
    St: Stream<Item = Result<WireEvent, E>> + Unpin + Send,
    E: fmt::Display + Send,
    Si: Sink<Outgoing> + Unpin + Send + 'static,
    Si::Error: fmt::Display,
{
    let monitor = HeartbeatMonitor::new(heartbeat);
    let mut writer = tokio::spawn(write_loop(connection.clone(), sink, outbound, monitor));
    let mut writer_finished = false;
    let close = connection.close_token().clone();

    let end = loop {
        let event = tokio::select! {
            event = stream.next() => event,
            () = close.cancelled() => break SessionEnd::LocalClose,
            result = &mut writer => {
                writer_finished = true;
                break SessionEnd::from_writer(result);
            }
        };

        let event = match event {
            None => break SessionEnd::PeerClosed,
            Some(Err(e)) => break SessionEnd::Transport(e.to_string()),
            Some(Ok(event)) => event,
        };
        // any inbound traffic proves the peer is alive
        connection.mark_alive();

        let payload = match &event {
            WireEvent::Text(text) => Payload::Text(text),
            WireEvent::Binary(bytes) => Payload::Binary(bytes),
            WireEvent::Close => {
                info!("peer sent close frame");
                break SessionEnd::PeerClosed;
            }
            WireEvent::Ping | WireEvent::Pong | WireEvent::Other => continue,
        };

        // Block-policy receivers may stall here; shutdown must still get through.
        tokio::select! {
            _ = dispatch(payload, &connection, &routes) => {}
            () = close.cancelled() => break SessionEnd::LocalClose,
        }
    };

    connection.close();
    if !writer_finished && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        warn!("writer did not finish in time, aborting");
        writer.abort();
    }

    let terminal = if end.is_failure() {
        ConnectionState::Failed
    } else {
        ConnectionState::Closed
    };
    let _ = connection.transition(terminal);
    info!(reason = end.as_str(), "session ended");
    end
}

async fn write_loop<Si>(
    connection: Arc<Connection>,
    mut sink: Si,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut monitor: HeartbeatMonitor,
) -> SessionEnd
where
    Si: Sink<Outgoing> + Unpin,
    Si::Error: fmt::Display,
{
    let close = connection.close_token().clone();
    let mut ping = monitor.interval().map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;
            () = close.cancelled() => {
                // flush what was queued before the close, then say goodbye
                while let Ok(text) = outbound.try_recv() {
                    if sink.send(Outgoing::Text(text)).await.is_err() {
                        return SessionEnd::LocalClose;
                    }
                }
                let _ = sink.send(Outgoing::Close).await;
                return SessionEnd::LocalClose;
            }
            msg = outbound.recv() => {
                let Some(text) = msg else {
                    return SessionEnd::LocalClose;
                };
                if let Err(e) = sink.send(Outgoing::Text(text)).await {
                    return SessionEnd::Transport(e.to_string());
                }
            }
            () = next_tick(ping.as_mut()) => {
                match monitor.tick(&connection) {
                    Liveness::Dead => {
                        warn!(
                            silent_for = ?connection.last_pong_elapsed(),
                            "peer unresponsive, disconnecting"
                        );
                        return SessionEnd::HeartbeatTimeout;
                    }
                    Liveness::Missed(missed) => debug!(missed, "peer missed heartbeat"),
                    Liveness::Alive => {}
                }
                if let Err(e) = sink.send(Outgoing::Ping).await {
                    return SessionEnd::Transport(e.to_string());
                }
            }
        }
    }
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Library adapters
// ─────────────────────────────────────────────────────────────────────────────

impl From<axum::extract::ws::Message> for WireEvent {
    fn from(message: axum::extract::ws::Message) -> Self {
        use axum::extract::ws::Message;
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            Message::Ping(_) => Self::Ping,
            Message::Pong(_) => Self::Pong,
            Message::Close(_) => Self::Close,
        }
    }
}

impl From<Outgoing> for axum::extract::ws::Message {
    fn from(out: Outgoing) -> Self {
        match out {
            Outgoing::Text(text) => Self::Text(text.to_string().into()),
            Outgoing::Ping => Self::Ping(Vec::new().into()),
            Outgoing::Close => Self::Close(None),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Message> for WireEvent {
    fn from(message: tokio_tungstenite::tungstenite::Message) -> Self {
        use tokio_tungstenite::tungstenite::Message;
        match message {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(bytes) => Self::Binary(bytes.to_vec()),
            Message::Ping(_) => Self::Ping,
            Message::Pong(_) => Self::Pong,
            Message::Close(_) => Self::Close,
            Message::Frame(_) => Self::Other,
        }
    }
}

impl From<Outgoing> for tokio_tungstenite::tungstenite::Message {
    fn from(out: Outgoing) -> Self {
        match out {
            Outgoing::Text(text) => Self::Text(text.to_string().into()),
            Outgoing::Ping => Self::Ping(Vec::new().into()),
            Outgoing::Close => Self::Close(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Role;
    use crate::peers::PeerSet;
    use crate::route::{Receiver, RouteManager, Sender};
    use futures::channel::mpsc as fmpsc;
    use tokio_util::sync::CancellationToken;
    use wscomms_core::{Frame, Message};

    type EventTx = fmpsc::UnboundedSender<Result<WireEvent, String>>;
    type OutRx = fmpsc::UnboundedReceiver<Outgoing>;

    struct Harness {
        connection: Arc<Connection>,
        events: EventTx,
        written: OutRx,
        manager: RouteManager,
        session: tokio::task::JoinHandle<SessionEnd>,
    }

    fn start(heartbeat: HeartbeatSettings) -> Harness {
        let peers = Arc::new(PeerSet::new(Role::Server));
        let routes = RouteTable::new(peers);
        let manager = RouteManager::new(Receiver::new(true), Sender::new("s"));
        routes.register("/test_route", manager.clone()).unwrap();

        let (events, stream) = fmpsc::unbounded();
        let (sink, written) = fmpsc::unbounded::<Outgoing>();
        let (tx, rx) = mpsc::channel(8);
        let connection = Arc::new(Connection::new(Role::Server, None, tx, &CancellationToken::new()));
        assert!(connection.transition(ConnectionState::Open));

        let session = tokio::spawn({
            let connection = connection.clone();
            async move { run_session(connection, stream, sink, rx, routes, &heartbeat).await }
        });
        Harness {
            connection,
            events,
            written,
            manager,
            session,
        }
    }

    fn no_heartbeat() -> HeartbeatSettings {
        HeartbeatSettings {
            interval_ms: 0,
            timeout_ms: 0,
        }
    }

    fn text_frame(route: &str, data: &str) -> WireEvent {
        let frame = Frame::new(route, Message::new("welcome", data).unwrap(), None);
        WireEvent::Text(frame.encode().unwrap())
    }

    #[tokio::test]
    async fn inbound_frames_reach_receiver_in_order() {
        let h = start(no_heartbeat());
        for i in 0..3 {
            h.events.unbounded_send(Ok(text_frame("/test_route", &i.to_string()))).unwrap();
        }
        for i in 0..3 {
            let got = h.manager.receiver().receive().await.unwrap();
            assert_eq!(got.message.data_str(), Some(i.to_string().as_str()));
        }
        h.events.unbounded_send(Ok(WireEvent::Close)).unwrap();
        assert_eq!(h.session.await.unwrap(), SessionEnd::PeerClosed);
        assert_eq!(h.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn bad_frames_do_not_close_the_session() {
        let h = start(no_heartbeat());
        h.events.unbounded_send(Ok(WireEvent::Text("garbage".into()))).unwrap();
        h.events.unbounded_send(Ok(text_frame("/unknown", "x"))).unwrap();
        h.events.unbounded_send(Ok(text_frame("/test_route", "ok"))).unwrap();

        let got = h.manager.receiver().receive().await.unwrap();
        assert_eq!(got.message.data_str(), Some("ok"));
        assert_eq!(h.connection.decode_error_count(), 1);
        assert_eq!(h.connection.unrouted_count(), 1);
        assert!(h.connection.is_open());
        drop(h.events);
        assert_eq!(h.session.await.unwrap(), SessionEnd::PeerClosed);
    }

    #[tokio::test]
    async fn outbound_frames_are_written() {
        let mut h = start(no_heartbeat());
        h.connection.send_text(Arc::from("payload")).await.unwrap();
        match h.written.next().await {
            Some(Outgoing::Text(text)) => assert_eq!(&*text, "payload"),
            other => panic!("unexpected {other:?}"),
        }
        h.connection.close();
        assert_eq!(h.session.await.unwrap(), SessionEnd::LocalClose);
        assert!(matches!(h.written.next().await, Some(Outgoing::Close)));
    }

    #[tokio::test]
    async fn transport_error_fails_connection() {
        let h = start(no_heartbeat());
        h.events.unbounded_send(Err("reset by peer".into())).unwrap();
        assert_eq!(
            h.session.await.unwrap(),
            SessionEnd::Transport("reset by peer".into())
        );
        assert_eq!(h.connection.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let mut h = start(HeartbeatSettings {
            interval_ms: 100,
            timeout_ms: 200,
        });
        // first tick: alive from connect, ping sent
        assert!(matches!(h.written.next().await, Some(Outgoing::Ping)));
        assert_eq!(h.session.await.unwrap(), SessionEnd::HeartbeatTimeout);
        assert_eq!(h.connection.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_session_alive() {
        let mut h = start(HeartbeatSettings {
            interval_ms: 100,
            timeout_ms: 200,
        });
        for _ in 0..5 {
            assert!(matches!(h.written.next().await, Some(Outgoing::Ping)));
            h.events.unbounded_send(Ok(WireEvent::Pong)).unwrap();
        }
        assert!(h.connection.is_open());
        h.connection.close();
        assert_eq!(h.session.await.unwrap(), SessionEnd::LocalClose);
    }
}
