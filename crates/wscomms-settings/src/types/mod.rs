//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields get their default value.

mod client;
mod queue;
mod server;

pub use client::*;
pub use queue::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "client": { "reconnect": { "maxRetries": 10 } },
///   "queue": { "capacity": 64, "overflow": "dropNewest" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsSettings {
    /// Server endpoint settings.
    pub server: ServerSettings,
    /// Client endpoint settings.
    pub client: ClientSettings,
    /// Defaults for queue-backed receivers.
    pub queue: QueueSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl WsSettings {
    /// Reject values that would make an endpoint unusable.
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(SettingsError::rejected("queue.capacity", "must be at least 1"));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::rejected("server.outboundBuffer", "must be at least 1"));
        }
        if self.client.outbound_buffer == 0 {
            return Err(SettingsError::rejected("client.outboundBuffer", "must be at least 1"));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::rejected("server.maxConnections", "must be at least 1"));
        }
        if let Some(problem) = self.server.path_problem() {
            return Err(SettingsError::rejected("server.path", problem));
        }
        if !self.client.path.starts_with('/') {
            return Err(SettingsError::rejected(
                "client.path",
                format!("must start with '/': {:?}", self.client.path),
            ));
        }
        if !(0.0..=1.0).contains(&self.client.reconnect.jitter_factor) {
            return Err(SettingsError::rejected(
                "client.reconnect.jitterFactor",
                "must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}

/// Ping/pong liveness settings shared by both endpoint roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between pings in ms.
    pub interval_ms: u64,
    /// Peer silence (no pong) after which the connection is dropped, in ms.
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 90_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        WsSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut s = WsSettings::default();
        s.queue.capacity = 0;
        assert_matches!(s.validate(), Err(SettingsError::Rejected { .. }));
    }

    #[test]
    fn path_without_slash_rejected() {
        let mut s = WsSettings::default();
        s.client.path = "ws".into();
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("client.path"));
    }

    #[test]
    fn reserved_server_paths_rejected() {
        for reserved in RESERVED_PATHS {
            let mut s = WsSettings::default();
            s.server.path = reserved.into();
            assert_matches!(
                s.validate(),
                Err(SettingsError::Rejected { key: "server.path", .. })
            );
        }
    }

    #[test]
    fn server_path_without_slash_rejected() {
        let mut s = WsSettings::default();
        s.server.path = "ws".into();
        assert_matches!(
            s.validate(),
            Err(SettingsError::Rejected { key: "server.path", .. })
        );
    }

    #[test]
    fn jitter_out_of_range_rejected() {
        let mut s = WsSettings::default();
        s.client.reconnect.jitter_factor = 1.5;
        assert_matches!(s.validate(), Err(SettingsError::Rejected { .. }));
    }

    #[test]
    fn empty_object_deserializes_to_defaults() {
        let s: WsSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.logging.level, "info");
        assert!(!s.logging.json);
    }
}
