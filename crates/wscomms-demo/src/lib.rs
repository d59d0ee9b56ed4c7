//! # wscomms-demo
//!
//! Shared wiring for the `wscomms-server` and `wscomms-client` binaries: both
//! sides register one route, greet the other side on a fixed interval and log
//! whatever arrives.

#![deny(unsafe_code)]

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use wscomms::{Message, Receiver, Sender, TaskContext};
use wscomms_core::logging::{LogFormat, init_subscriber};
use wscomms_settings::{LoggingSettings, WsSettings};

/// Load settings from `path`, or from the default location when `None`.
pub fn load_settings(path: Option<&Path>) -> Result<WsSettings> {
    let settings = match path {
        Some(path) => wscomms_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => wscomms_settings::load_settings().context("Failed to load settings")?,
    };
    Ok(settings)
}

/// Install the stderr subscriber described by `logging`.
pub fn init_logging(logging: &LoggingSettings) {
    let format = if logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&logging.level, format);
}

/// Outcome counts of one [`greet`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GreetStats {
    /// Sends that returned `Ok` (a server send may still reach zero peers).
    pub sent: u64,
    /// Sends that failed, typically `NotConnected` while a client reconnects.
    pub failed: u64,
}

/// Send `welcome` with `greeting` immediately, then again every `interval`
/// until cancelled.
///
/// Failed sends are logged and retried on the next tick.
pub async fn greet(
    ctx: TaskContext,
    sender: Sender,
    greeting: String,
    interval: Duration,
) -> GreetStats {
    let mut stats = GreetStats::default();
    loop {
        let message = match Message::new("welcome", greeting.as_str()) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "cannot build greeting");
                return stats;
            }
        };
        match sender.send(message).await {
            Ok(report) => {
                stats.sent += 1;
                info!(
                    delivered = report.delivered_count(),
                    failed = report.failures.len(),
                    "greeting sent"
                );
            }
            Err(e) => {
                stats.failed += 1;
                warn!(error = %e, "greeting not sent");
            }
        }
        if !ctx.sleep(interval).await {
            info!(sent = stats.sent, failed = stats.failed, "greeter stopped");
            return stats;
        }
    }
}

/// Log every inbound message until the receiver closes or the task is cancelled.
pub async fn log_inbound(ctx: TaskContext, receiver: Receiver) {
    loop {
        tokio::select! {
            () = ctx.cancelled() => return,
            next = receiver.receive() => match next {
                Ok(inbound) => info!(
                    route = %inbound.route,
                    peer = %inbound.peer,
                    sender = inbound.sender.as_deref().unwrap_or("-"),
                    msg = inbound.message.name(),
                    data = %inbound.message.data(),
                    "received"
                ),
                Err(_) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wscomms::{ClientEndpoint, ClientSettings, Receiver, RouteManager};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn file_overrides_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9001}}"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.server.path, "/ws");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(load_settings(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn greet_sends_before_first_sleep() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = ClientEndpoint::with_settings(ClientSettings {
            host: "127.0.0.1".into(),
            port,
            ..ClientSettings::default()
        });
        let sender = Sender::new("default_sender");
        client
            .add_route_handler("/test_route", RouteManager::new(Receiver::new(true), sender.clone()))
            .unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        client.add_background_task("greeter", move |ctx| async move {
            let stats = greet(ctx, sender, "Hello from client".into(), Duration::from_secs(3600)).await;
            let _ = tx.send(stats);
        });

        let handle = client.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await.unwrap();

        // one attempt right away (nobody is listening), none after it
        let stats = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, GreetStats { sent: 0, failed: 1 });
    }
}
