//! # wscomms-core
//!
//! Shared vocabulary for the wscomms messaging layer:
//!
//! - **Wire envelope**: [`Message`] (name + JSON payload) and [`Frame`] (message bound to a route)
//! - **Errors**: [`WsError`] taxonomy via `thiserror`
//! - **IDs**: [`ConnectionId`]
//! - **Backoff**: reconnection delay math in [`retry`]
//! - **Logging**: `tracing` subscriber setup in [`logging`]

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod retry;

pub use errors::{Result, WsError};
pub use ids::ConnectionId;
pub use message::{Frame, Message};
