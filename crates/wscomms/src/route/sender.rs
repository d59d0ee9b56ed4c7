//! Outbound side of a route.
//!
//! A [`Sender`] is created unbound and becomes usable once its
//! [`RouteManager`](super::RouteManager) is registered on an endpoint. The
//! same `send` call behaves per role:
//!
//! - **Client**: writes to the single open connection, or fails with
//!   [`WsError::NotConnected`] while disconnected.
//! - **Server**: fans out to every live connection; per-peer failures are
//!   reported in the [`SendReport`] and never abort the others.

use std::fmt;
use std::sync::{Arc, OnceLock};

use metrics::counter;
use tracing::{debug, instrument};
use wscomms_core::{ConnectionId, Frame, Message, Result, WsError};

use crate::connection::Role;
use crate::metrics::{MESSAGES_SENT_TOTAL, SEND_FAILURES_TOTAL};
use crate::peers::{PeerSet, SendReport};

struct Binding {
    route: String,
    peers: Arc<PeerSet>,
}

struct SenderInner {
    name: String,
    binding: OnceLock<Binding>,
}

/// Named outbound endpoint of a route. Cheap to clone; clones share the binding.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

impl Sender {
    /// Create an unbound sender. The name travels with every frame.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                name: name.into(),
                binding: OnceLock::new(),
            }),
        }
    }

    /// Sender name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Route this sender is bound to, once registered.
    pub fn route(&self) -> Option<&str> {
        self.inner.binding.get().map(|b| b.route.as_str())
    }

    /// Whether the sender has been registered on an endpoint.
    pub fn is_bound(&self) -> bool {
        self.inner.binding.get().is_some()
    }

    /// Attach to a route on an endpoint. A sender binds exactly once.
    pub(crate) fn bind(&self, route: &str, peers: Arc<PeerSet>) -> Result<()> {
        self.inner
            .binding
            .set(Binding {
                route: route.to_owned(),
                peers,
            })
            .map_err(|_| WsError::SenderAlreadyBound {
                sender: self.inner.name.clone(),
                route: route.to_owned(),
            })
    }

    fn encode(&self, binding: &Binding, message: Message) -> Result<Arc<str>> {
        let frame = Frame::new(binding.route.clone(), message, Some(self.inner.name.clone()));
        Ok(Arc::from(frame.encode()?))
    }

    /// Send `message` on the bound route.
    ///
    /// On a server with no connected peers this succeeds with an empty
    /// report. An unregistered sender fails with [`WsError::NotConnected`].
    #[instrument(skip_all, fields(sender = %self.inner.name, msg = message.name()))]
    pub async fn send(&self, message: Message) -> Result<SendReport> {
        let binding = self.inner.binding.get().ok_or(WsError::NotConnected)?;
        let text = self.encode(binding, message)?;
        let route = binding.route.clone();

        let report = match binding.peers.role() {
            Role::Client => {
                let Some(conn) = binding.peers.first_open().await else {
                    counter!(SEND_FAILURES_TOTAL, "route" => route).increment(1);
                    return Err(WsError::NotConnected);
                };
                if let Err(e) = conn.send_text(text).await {
                    counter!(SEND_FAILURES_TOTAL, "route" => route).increment(1);
                    return Err(e);
                }
                SendReport {
                    delivered: vec![conn.id().clone()],
                    failures: Vec::new(),
                }
            }
            Role::Server => binding.peers.broadcast(text).await,
        };

        debug!(
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "sent"
        );
        counter!(MESSAGES_SENT_TOTAL, "route" => route.clone())
            .increment(report.delivered.len() as u64);
        if !report.failures.is_empty() {
            counter!(SEND_FAILURES_TOTAL, "route" => route)
                .increment(report.failures.len() as u64);
        }
        Ok(report)
    }

    /// Send `message` to one connection only.
    #[instrument(skip_all, fields(sender = %self.inner.name, conn_id = %peer))]
    pub async fn send_to(&self, peer: &ConnectionId, message: Message) -> Result<()> {
        let binding = self.inner.binding.get().ok_or(WsError::NotConnected)?;
        let text = self.encode(binding, message)?;
        let conn = binding.peers.get(peer).await.ok_or(WsError::NotConnected)?;
        match conn.send_text(text).await {
            Ok(()) => {
                counter!(MESSAGES_SENT_TOTAL, "route" => binding.route.clone()).increment(1);
                Ok(())
            }
            Err(e) => {
                counter!(SEND_FAILURES_TOTAL, "route" => binding.route.clone()).increment(1);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("name", &self.inner.name)
            .field("route", &self.route())
            .finish()
    }
}
