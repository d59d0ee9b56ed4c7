//! Route registration and lookup.
//!
//! A route is a path like `/test_route` multiplexed over the endpoint's
//! connection(s). Each route owns one [`RouteManager`]: a [`Receiver`] for
//! inbound messages addressed to it and a [`Sender`] for outbound ones.

pub mod receiver;
pub mod sender;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use wscomms_core::{Result, WsError};

pub use receiver::{Inbound, MessageHandler, Receiver};
pub use sender::Sender;

use crate::peers::PeerSet;

/// The receiver and sender serving one route.
#[derive(Clone, Debug)]
pub struct RouteManager {
    receiver: Receiver,
    sender: Sender,
}

impl RouteManager {
    /// Pair a receiver with a sender.
    pub fn new(receiver: Receiver, sender: Sender) -> Self {
        Self { receiver, sender }
    }

    /// Inbound side.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Outbound side.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

/// Route path to manager map of one endpoint.
///
/// Registration may happen at any time, including while connections are
/// live; lookups clone the manager out so dispatch never awaits under the lock.
#[derive(Clone)]
pub struct RouteTable {
    routes: Arc<RwLock<HashMap<String, RouteManager>>>,
    peers: Arc<PeerSet>,
}

impl RouteTable {
    pub(crate) fn new(peers: Arc<PeerSet>) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            peers,
        }
    }

    /// Register `manager` under `path` and bind its sender to this endpoint.
    ///
    /// Fails with [`WsError::InvalidRoute`] unless the path starts with `/`,
    /// [`WsError::DuplicateRoute`] if the path is taken, and
    /// [`WsError::SenderAlreadyBound`] if the sender serves another route.
    pub fn register(&self, path: &str, manager: RouteManager) -> Result<()> {
        validate_path(path)?;
        let mut routes = self.routes.write();
        if routes.contains_key(path) {
            return Err(WsError::DuplicateRoute {
                route: path.to_owned(),
            });
        }
        manager.sender.bind(path, self.peers.clone())?;
        info!(
            route = path,
            sender = manager.sender.name(),
            queue = manager.receiver.uses_queue(),
            "route registered"
        );
        let _ = routes.insert(path.to_owned(), manager);
        Ok(())
    }

    /// Manager for `path`, if registered.
    pub fn get(&self, path: &str) -> Option<RouteManager> {
        self.routes.read().get(path).cloned()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Close every route's receiver.
    pub(crate) fn close_receivers(&self) {
        for manager in self.routes.read().values() {
            manager.receiver.close();
        }
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(WsError::InvalidRoute(format!(
            "route must start with '/': {path:?}"
        )));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(WsError::InvalidRoute(format!(
            "route must not contain whitespace: {path:?}"
        )));
    }
    Ok(())
}
