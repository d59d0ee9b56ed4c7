//! The set of live connections an endpoint can send to.
//!
//! Membership changes take the write lock; fan-out snapshots the current
//! members under the read lock and sends without holding it, so a slow peer
//! never blocks connects or disconnects.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use wscomms_core::{ConnectionId, WsError};

use crate::connection::{Connection, Role};

/// One peer a send could not reach.
#[derive(Debug)]
pub struct PeerFailure {
    /// The peer.
    pub peer: ConnectionId,
    /// Why the frame was not queued.
    pub error: WsError,
}

/// Per-peer outcome of one send.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Peers the frame was queued to.
    pub delivered: Vec<ConnectionId>,
    /// Peers that failed.
    pub failures: Vec<PeerFailure>,
}

impl SendReport {
    /// Number of peers reached.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// Whether no peer failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Live connections of one endpoint, keyed by ID.
pub struct PeerSet {
    role: Role,
    peers: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl PeerSet {
    /// Empty set for an endpoint of the given role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Role of the owning endpoint.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut peers = self.peers.write().await;
        let _ = peers.insert(connection.id().clone(), connection);
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.peers.write().await.remove(id)
    }

    /// Look up one connection.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.peers.read().await.get(id).cloned()
    }

    /// Current members, in no particular order.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether there are no live connections.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// First open connection, if any.
    pub async fn first_open(&self) -> Option<Arc<Connection>> {
        self.peers
            .read()
            .await
            .values()
            .find(|c| c.is_open())
            .cloned()
    }

    /// Queue `text` to every live connection concurrently.
    ///
    /// A failure on one peer never prevents delivery to the others.
    pub async fn broadcast(&self, text: Arc<str>) -> SendReport {
        let recipients = self.snapshot().await;
        debug!(recipients = recipients.len(), "broadcast frame");

        let outcomes = join_all(recipients.iter().map(|conn| {
            let text = text.clone();
            async move { (conn.id().clone(), conn.send_text(text).await) }
        }))
        .await;

        let mut report = SendReport::default();
        for (peer, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered.push(peer),
                Err(error) => {
                    warn!(conn_id = %peer, error = %error, "failed to send frame to peer");
                    report.failures.push(PeerFailure { peer, error });
                }
            }
        }
        report
    }

    /// Request a graceful close of every connection.
    pub async fn close_all(&self) {
        for conn in self.snapshot().await {
            conn.close();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
