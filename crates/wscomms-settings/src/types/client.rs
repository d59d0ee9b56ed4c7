//! Client endpoint settings.

use serde::{Deserialize, Serialize};

use super::HeartbeatSettings;

/// Reconnection policy for a client whose connection drops unexpectedly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether to reconnect at all. When `false` the first drop ends `run`.
    pub enabled: bool,
    /// Base delay for exponential backoff in ms.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms.
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0.
    pub jitter_factor: f64,
    /// Consecutive failed attempts before giving up (`None` = retry forever).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            max_retries: None,
        }
    }
}

/// Remote address and connection behaviour for a client endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// HTTP path of the server's WebSocket upgrade.
    pub path: String,
    /// Timeout for one connection attempt (TCP + handshake) in ms.
    pub connect_timeout_ms: u64,
    /// Outbound buffer (frames) before senders suspend.
    pub outbound_buffer: usize,
    /// How long `stop` waits for tasks and the connection before aborting them.
    pub shutdown_timeout_ms: u64,
    /// Reconnection policy.
    pub reconnect: ReconnectSettings,
    /// Ping/pong liveness checks.
    pub heartbeat: HeartbeatSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            connect_timeout_ms: 10_000,
            outbound_buffer: 256,
            shutdown_timeout_ms: 5_000,
            reconnect: ReconnectSettings::default(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl ClientSettings {
    /// WebSocket URL of the server.
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, self.path)
    }
}
