//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// Pass the handle to [`ServerEndpoint::with_metrics`](crate::server::ServerEndpoint::with_metrics)
/// to expose it at `/metrics`. Fails if a global recorder is already set.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

// ─────────────────────────────────────────────────────────────────────────────
// Connections
// ─────────────────────────────────────────────────────────────────────────────

/// Counter: connections opened (label `role`).
pub const CONNECTIONS_TOTAL: &str = "wscomms_connections_total";
/// Counter: connections closed (labels `role`, `reason`).
pub const DISCONNECTIONS_TOTAL: &str = "wscomms_disconnections_total";
/// Gauge: currently open connections (label `role`).
pub const CONNECTIONS_ACTIVE: &str = "wscomms_connections_active";
/// Histogram: connection lifetime in seconds.
pub const CONNECTION_DURATION_SECONDS: &str = "wscomms_connection_duration_seconds";
/// Counter: upgrade requests refused because the server was full.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "wscomms_connections_rejected_total";
/// Counter: client reconnect attempts after a failure or drop.
pub const RECONNECT_ATTEMPTS_TOTAL: &str = "wscomms_reconnect_attempts_total";

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// Counter: frames written to peers (label `route`).
pub const MESSAGES_SENT_TOTAL: &str = "wscomms_messages_sent_total";
/// Counter: frames delivered to a receiver (label `route`).
pub const MESSAGES_RECEIVED_TOTAL: &str = "wscomms_messages_received_total";
/// Counter: per-peer send failures (label `route`).
pub const SEND_FAILURES_TOTAL: &str = "wscomms_send_failures_total";
/// Counter: inbound messages dropped by a full receiver queue (label `route`).
pub const RECEIVER_DROPPED_TOTAL: &str = "wscomms_receiver_dropped_total";
/// Counter: inbound frames addressed to an unregistered route.
pub const UNROUTED_MESSAGES_TOTAL: &str = "wscomms_unrouted_messages_total";
/// Counter: inbound frames that failed to decode.
pub const DECODE_ERRORS_TOTAL: &str = "wscomms_decode_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed() {
        for name in [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTION_DURATION_SECONDS,
            CONNECTIONS_REJECTED_TOTAL,
            RECONNECT_ATTEMPTS_TOTAL,
            MESSAGES_SENT_TOTAL,
            MESSAGES_RECEIVED_TOTAL,
            SEND_FAILURES_TOTAL,
            RECEIVER_DROPPED_TOTAL,
            UNROUTED_MESSAGES_TOTAL,
            DECODE_ERRORS_TOTAL,
        ] {
            assert!(name.starts_with("wscomms_"), "{name}");
        }
    }

    #[test]
    fn recorder_renders_registered_counter() {
        // Build a local recorder so tests do not fight over the global one.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(UNROUTED_MESSAGES_TOTAL).increment(2);
        });
        let output = handle.render();
        assert!(output.contains(UNROUTED_MESSAGES_TOTAL));
    }
}
