//! # wscomms
//!
//! Route-based bidirectional messaging over WebSocket.
//!
//! An endpoint ([`ServerEndpoint`] or [`ClientEndpoint`]) multiplexes any
//! number of named routes over its connection(s). Each route is served by a
//! [`RouteManager`]: a [`Receiver`] that collects inbound messages and a
//! [`Sender`] that emits outbound ones. Background tasks registered on the
//! endpoint run alongside the connection loop and stop with it.
//!
//! ```ignore
//! let receiver = Receiver::new(true);
//! let sender = Sender::new("default_sender");
//! let mut server = ServerEndpoint::new("0.0.0.0", 8080);
//! server.add_route_handler("/test_route", RouteManager::new(receiver.clone(), sender.clone()))?;
//! server.add_background_task("greeter", move |ctx| async move {
//!     while ctx.sleep(Duration::from_secs(1)).await {
//!         if let Ok(msg) = Message::new("welcome", "Hello from server") {
//!             let _ = sender.send(msg).await;
//!         }
//!     }
//! });
//! server.run().await?;
//! ```
//!
//! Frames on the wire are JSON text:
//! `{"route": "/test_route", "msg": "welcome", "data": ..., "sender": "default_sender"}`.

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
mod endpoint;
pub mod metrics;
pub mod peers;
pub mod route;
pub mod server;
pub mod shutdown;
pub mod tasks;

pub use client::{ClientEndpoint, ClientHandle};
pub use connection::{Connection, ConnectionState, Role};
pub use peers::{PeerFailure, PeerSet, SendReport};
pub use route::{Inbound, MessageHandler, Receiver, RouteManager, RouteTable, Sender};
pub use server::{HealthResponse, ServerEndpoint, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use tasks::TaskContext;
pub use wscomms_core::{ConnectionId, Frame, Message, Result, WsError};
pub use wscomms_settings::{
    ClientSettings, HeartbeatSettings, OverflowPolicy, QueueSettings, ReconnectSettings,
    ServerSettings,
};
