//! Error taxonomy for route-based messaging.
//!
//! [`WsError`] covers every failure surfaced to callers of the messaging API.
//! [`WsError::UnroutedMessage`] is the one diagnostic-only variant: the
//! connection read loop logs and counts it but never propagates it.

use thiserror::Error;

/// Errors produced by endpoints, connections, senders and receivers.
#[derive(Debug, Error)]
pub enum WsError {
    /// A send was attempted with no live transport.
    #[error("not connected")]
    NotConnected,

    /// A receive was attempted on a route that has been torn down and has
    /// nothing left to deliver.
    #[error("receiver closed")]
    Closed,

    /// A route path was registered twice on the same endpoint.
    #[error("route already registered: {route}")]
    DuplicateRoute {
        /// The conflicting route path.
        route: String,
    },

    /// An inbound frame did not match the expected envelope shape.
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// An inbound frame named a route with no registered handler.
    #[error("no handler registered for route {route}")]
    UnroutedMessage {
        /// The route named by the frame.
        route: String,
    },

    /// A message was constructed with invalid contents (e.g. an empty name).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A route or WebSocket path is malformed, or collides with a built-in path.
    #[error("invalid route path: {0:?}")]
    InvalidRoute(String),

    /// A sender was registered on a second route or endpoint.
    #[error("sender {sender} is already bound to route {route}")]
    SenderAlreadyBound {
        /// Name of the sender.
        sender: String,
        /// Route the sender is already bound to.
        route: String,
    },

    /// The client gave up reconnecting after exhausting its retry budget.
    #[error("reconnection failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of connection attempts made.
        attempts: u32,
    },

    /// Socket-level I/O failure (bind, accept).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol or handshake failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl WsError {
    /// Short machine-readable code, used as a metric/log label.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Closed => "closed",
            Self::DuplicateRoute { .. } => "duplicate_route",
            Self::Decode(_) => "decode_error",
            Self::UnroutedMessage { .. } => "unrouted_message",
            Self::InvalidMessage(_) => "invalid_message",
            Self::InvalidRoute(_) => "invalid_route",
            Self::SenderAlreadyBound { .. } => "sender_already_bound",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
            Self::Io(_) => "io",
            Self::Transport(_) => "transport",
        }
    }

    /// Whether this error is fatal to the endpoint that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. } | Self::Io(_))
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type for wscomms operations.
pub type Result<T> = std::result::Result<T, WsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
