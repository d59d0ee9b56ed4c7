//! Ping/pong liveness bookkeeping.
//!
//! The writer task ticks a [`HeartbeatMonitor`] on every ping interval. If the
//! peer has not been heard from since the previous tick the missed counter
//! grows; once it reaches `timeout / interval` the connection is dead.

use std::time::Duration;

use wscomms_settings::HeartbeatSettings;

use super::Connection;

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    /// The peer answered since the last tick.
    Alive,
    /// The peer has missed this many consecutive ticks.
    Missed(u32),
    /// The peer missed enough ticks to be considered gone.
    Dead,
}

pub(crate) struct HeartbeatMonitor {
    interval: Option<Duration>,
    max_missed: u32,
    missed: u32,
}

impl HeartbeatMonitor {
    /// A zero interval disables pings and liveness checks.
    pub(crate) fn new(settings: &HeartbeatSettings) -> Self {
        let interval = (settings.interval_ms > 0).then(|| Duration::from_millis(settings.interval_ms));
        #[allow(clippy::cast_possible_truncation)]
        let max_missed = (settings.timeout_ms / settings.interval_ms.max(1)).clamp(1, u64::from(u32::MAX)) as u32;
        Self {
            interval,
            max_missed,
            missed: 0,
        }
    }

    pub(crate) fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub(crate) fn tick(&mut self, connection: &Connection) -> Liveness {
        if connection.check_alive() {
            self.missed = 0;
            return Liveness::Alive;
        }
        self.missed += 1;
        if self.missed >= self.max_missed {
            Liveness::Dead
        } else {
            Liveness::Missed(self.missed)
        }
    }
}
