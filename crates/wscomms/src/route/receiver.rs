//! Inbound side of a route.
//!
//! A [`Receiver`] is where the dispatch path delivers decoded messages for one
//! route. It runs in one of three modes:
//!
//! - **Queue**: bounded FIFO drained with [`Receiver::receive`]. When full the
//!   [`OverflowPolicy`] decides between back-pressure and dropping.
//! - **Latest**: a single slot holding the most recent message; newer
//!   messages overwrite unread ones.
//! - **Handler**: an async [`MessageHandler`] invoked inline for each message.
//!
//! Closing a receiver wakes every pending `receive()`; queued messages can
//! still be drained after close, then `receive()` returns
//! [`WsError::Closed`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wscomms_core::{ConnectionId, Message, Result, WsError};
use wscomms_settings::{OverflowPolicy, QueueSettings};

use crate::metrics::RECEIVER_DROPPED_TOTAL;

/// A message delivered to a receiver, with where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Inbound {
    /// Route the frame was addressed to.
    pub route: String,
    /// The decoded message.
    pub message: Message,
    /// Connection it arrived on.
    pub peer: ConnectionId,
    /// Name of the remote sender, if the frame carried one.
    pub sender: Option<String>,
}

/// Callback invoked for every message delivered to a handler-mode receiver.
///
/// Runs on the connection's read loop: a slow handler slows that peer.
/// Implemented for any `Fn(Inbound) -> impl Future<Output = ()>`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message.
    async fn handle(&self, inbound: Inbound);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Inbound) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, inbound: Inbound) {
        (self)(inbound).await;
    }
}

/// Outcome of handing a message to a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Queued, stored or handled.
    Delivered,
    /// Dropped by a full queue under [`OverflowPolicy::DropNewest`].
    Dropped,
    /// The receiver is closed.
    Closed,
}

enum Mode {
    Queue {
        tx: mpsc::Sender<Inbound>,
        rx: AsyncMutex<mpsc::Receiver<Inbound>>,
        overflow: OverflowPolicy,
    },
    Latest {
        slot: parking_lot::Mutex<Option<Inbound>>,
        notify: Notify,
    },
    Handler(Arc<dyn MessageHandler>),
}

struct ReceiverInner {
    mode: Mode,
    closed: CancellationToken,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Inbound endpoint of a route. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

impl Receiver {
    /// `use_queue = true` buffers every message in a FIFO with default
    /// [`QueueSettings`]; `false` keeps only the latest message.
    pub fn new(use_queue: bool) -> Self {
        if use_queue {
            Self::with_queue(&QueueSettings::default())
        } else {
            Self::latest()
        }
    }

    /// Queue-backed receiver with explicit capacity and overflow policy.
    pub fn with_queue(settings: &QueueSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        Self::from_mode(Mode::Queue {
            tx,
            rx: AsyncMutex::new(rx),
            overflow: settings.overflow,
        })
    }

    /// Single-slot receiver that keeps only the most recent message.
    pub fn latest() -> Self {
        Self::from_mode(Mode::Latest {
            slot: parking_lot::Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Receiver that invokes `handler` for every message.
    pub fn with_handler(handler: impl MessageHandler + 'static) -> Self {
        Self::from_mode(Mode::Handler(Arc::new(handler)))
    }

    fn from_mode(mode: Mode) -> Self {
        Self {
            inner: Arc::new(ReceiverInner {
                mode,
                closed: CancellationToken::new(),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Whether messages are buffered in a FIFO.
    pub fn uses_queue(&self) -> bool {
        matches!(self.inner.mode, Mode::Queue { .. })
    }

    /// Wait for the next message.
    ///
    /// Returns [`WsError::Closed`] once the receiver is closed and nothing
    /// is buffered. Handler-mode receivers never buffer, so they always
    /// return `Closed`.
    pub async fn receive(&self) -> Result<Inbound> {
        let closed = &self.inner.closed;
        match &self.inner.mode {
            Mode::Queue { rx, .. } => {
                let mut rx = rx.lock().await;
                tokio::select! {
                    biased;
                    item = rx.recv() => item.ok_or(WsError::Closed),
                    () = closed.cancelled() => rx.try_recv().map_err(|_| WsError::Closed),
                }
            }
            Mode::Latest { slot, notify } => loop {
                if let Some(item) = slot.lock().take() {
                    return Ok(item);
                }
                if closed.is_cancelled() {
                    return Err(WsError::Closed);
                }
                tokio::select! {
                    () = notify.notified() => {}
                    () = closed.cancelled() => {}
                }
            },
            Mode::Handler(_) => Err(WsError::Closed),
        }
    }

    /// Take a buffered message without waiting.
    pub fn try_receive(&self) -> Option<Inbound> {
        match &self.inner.mode {
            Mode::Queue { rx, .. } => rx.try_lock().ok()?.try_recv().ok(),
            Mode::Latest { slot, .. } => slot.lock().take(),
            Mode::Handler(_) => None,
        }
    }

    /// Hand one message to this receiver.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for queue space, or until
    /// the receiver closes.
    pub(crate) async fn deliver(&self, inbound: Inbound) -> Delivery {
        let inner = &self.inner;
        if inner.closed.is_cancelled() {
            return Delivery::Closed;
        }
        let outcome = match &inner.mode {
            Mode::Queue { tx, overflow, .. } => match overflow {
                OverflowPolicy::Block => tokio::select! {
                    sent = tx.send(inbound) => {
                        if sent.is_ok() { Delivery::Delivered } else { Delivery::Closed }
                    }
                    () = inner.closed.cancelled() => Delivery::Closed,
                },
                OverflowPolicy::DropNewest => match tx.try_send(inbound) {
                    Ok(()) => Delivery::Delivered,
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        let _ = inner.dropped.fetch_add(1, Ordering::Relaxed);
                        counter!(RECEIVER_DROPPED_TOTAL, "route" => dropped.route.clone())
                            .increment(1);
                        debug!(route = %dropped.route, "receiver queue full, dropping message");
                        Delivery::Dropped
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
                },
            },
            Mode::Latest { slot, notify } => {
                if slot.lock().replace(inbound).is_some() {
                    let _ = inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                notify.notify_one();
                Delivery::Delivered
            }
            Mode::Handler(handler) => {
                handler.handle(inbound).await;
                Delivery::Delivered
            }
        };
        if outcome == Delivery::Delivered {
            let _ = inner.delivered.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Stop accepting messages and wake all pending `receive()` calls.
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Messages accepted so far.
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Messages lost to overflow (queue mode) or overwritten unread (latest mode).
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.inner.mode {
            Mode::Queue { .. } => "queue",
            Mode::Latest { .. } => "latest",
            Mode::Handler(_) => "handler",
        };
        f.debug_struct("Receiver")
            .field("mode", &mode)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn inbound(data: &str) -> Inbound {
        Inbound {
            route: "/test_route".into(),
            message: Message::new("welcome", data).unwrap(),
            peer: ConnectionId::from("conn_test"),
            sender: Some("default_sender".into()),
        }
    }

    fn small_queue(capacity: usize, overflow: OverflowPolicy) -> Receiver {
        Receiver::with_queue(&QueueSettings { capacity, overflow })
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let rx = Receiver::new(true);
        for i in 0..5 {
            assert_eq!(rx.deliver(inbound(&i.to_string())).await, Delivery::Delivered);
        }
        for i in 0..5 {
            let got = rx.receive().await.unwrap();
            assert_eq!(got.message.data_str(), Some(i.to_string().as_str()));
        }
        assert_eq!(rx.delivered_count(), 5);
    }

    #[tokio::test]
    async fn receive_waits_for_delivery() {
        let rx = Receiver::new(true);
        let waiter = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.receive().await })
        };
        tokio::task::yield_now().await;
        let _ = rx.deliver(inbound("late")).await;
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.message.data_str(), Some("late"));
    }

    #[tokio::test]
    async fn close_wakes_pending_receive() {
        let rx = Receiver::new(true);
        let waiter = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.receive().await })
        };
        tokio::task::yield_now().await;
        rx.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receive should return promptly")
            .unwrap();
        assert_matches!(result, Err(WsError::Closed));
    }

    #[tokio::test]
    async fn queued_items_drain_after_close() {
        let rx = Receiver::new(true);
        let _ = rx.deliver(inbound("a")).await;
        let _ = rx.deliver(inbound("b")).await;
        rx.close();
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("a"));
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("b"));
        assert_matches!(rx.receive().await, Err(WsError::Closed));
        assert_eq!(rx.deliver(inbound("c")).await, Delivery::Closed);
    }

    #[tokio::test]
    async fn drop_newest_counts_overflow() {
        let rx = small_queue(2, OverflowPolicy::DropNewest);
        assert_eq!(rx.deliver(inbound("1")).await, Delivery::Delivered);
        assert_eq!(rx.deliver(inbound("2")).await, Delivery::Delivered);
        assert_eq!(rx.deliver(inbound("3")).await, Delivery::Dropped);
        assert_eq!(rx.dropped_count(), 1);
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("1"));
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("2"));
        assert!(rx.try_receive().is_none());
    }

    #[tokio::test]
    async fn block_waits_for_space() {
        let rx = small_queue(1, OverflowPolicy::Block);
        assert_eq!(rx.deliver(inbound("1")).await, Delivery::Delivered);

        let blocked = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.deliver(inbound("2")).await })
        };
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("1"));
        assert_eq!(blocked.await.unwrap(), Delivery::Delivered);
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("2"));
        assert_eq!(rx.dropped_count(), 0);
    }

    #[tokio::test]
    async fn close_releases_blocked_delivery() {
        let rx = small_queue(1, OverflowPolicy::Block);
        let _ = rx.deliver(inbound("1")).await;
        let blocked = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.deliver(inbound("2")).await })
        };
        tokio::task::yield_now().await;
        rx.close();
        assert_eq!(blocked.await.unwrap(), Delivery::Closed);
    }

    #[tokio::test]
    async fn latest_keeps_only_newest() {
        let rx = Receiver::new(false);
        assert!(!rx.uses_queue());
        let _ = rx.deliver(inbound("old")).await;
        let _ = rx.deliver(inbound("new")).await;
        assert_eq!(rx.dropped_count(), 1);
        assert_eq!(rx.receive().await.unwrap().message.data_str(), Some("new"));
        assert!(rx.try_receive().is_none());
    }

    #[tokio::test]
    async fn latest_close_wakes_waiter() {
        let rx = Receiver::latest();
        let waiter = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.receive().await })
        };
        tokio::task::yield_now().await;
        rx.close();
        assert_matches!(waiter.await.unwrap(), Err(WsError::Closed));
    }

    #[tokio::test]
    async fn handler_is_invoked_inline() {
        let (tx, mut seen) = mpsc::unbounded_channel();
        let rx = Receiver::with_handler(move |msg: Inbound| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.message.name().to_owned());
            }
        });
        assert_eq!(rx.deliver(inbound("x")).await, Delivery::Delivered);
        assert_eq!(seen.recv().await.as_deref(), Some("welcome"));
        assert_matches!(rx.receive().await, Err(WsError::Closed));
    }

    #[tokio::test]
    async fn struct_handler() {
        struct Count(Arc<AtomicU64>);

        #[async_trait]
        impl MessageHandler for Count {
            async fn handle(&self, _inbound: Inbound) {
                let _ = self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let count = Arc::new(AtomicU64::new(0));
        let rx = Receiver::with_handler(Count(count.clone()));
        let _ = rx.deliver(inbound("a")).await;
        let _ = rx.deliver(inbound("b")).await;
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
