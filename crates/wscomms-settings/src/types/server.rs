//! Server endpoint settings.

use serde::{Deserialize, Serialize};

use super::HeartbeatSettings;

/// HTTP paths the server routes itself; the WebSocket path may not reuse them.
pub const RESERVED_PATHS: [&str; 2] = ["/health", "/metrics"];

/// Listening socket and per-connection limits for a server endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
    /// HTTP path that accepts the WebSocket upgrade.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound buffer (frames) before senders suspend.
    pub outbound_buffer: usize,
    /// How long `stop` waits for tasks and connections before aborting them.
    pub shutdown_timeout_ms: u64,
    /// Ping/pong liveness checks.
    pub heartbeat: HeartbeatSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            max_connections: 256,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            outbound_buffer: 256,
            shutdown_timeout_ms: 5_000,
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Why [`path`](Self::path) cannot carry the WebSocket upgrade, if it cannot.
    pub fn path_problem(&self) -> Option<String> {
        if !self.path.starts_with('/') {
            return Some(format!("must start with '/': {:?}", self.path));
        }
        if RESERVED_PATHS.contains(&self.path.as_str()) {
            return Some(format!("{:?} is served by the endpoint itself", self.path));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerSettings::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.path, "/ws");
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerSettings = serde_json::from_str(r#"{"port": 9090}"#).unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.outbound_buffer, 256);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(ServerSettings::default()).unwrap();
        assert!(json.get("maxConnections").is_some());
        assert!(json.get("shutdownTimeoutMs").is_some());
        assert!(json["heartbeat"].get("intervalMs").is_some());
    }
}
