//! Receiver queue settings.

use serde::{Deserialize, Serialize};

/// What the dispatch path does when a receiver's queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Wait for space, stalling the connection's read loop (and therefore the
    /// peer's writes).
    #[default]
    Block,
    /// Drop the incoming message and count it.
    DropNewest,
}

impl OverflowPolicy {
    /// Parse the env/CLI spelling (`block`, `drop-newest`, `drop_newest`, `dropNewest`).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_lowercase().replace(['-', '_'], "").as_str() {
            "block" => Some(Self::Block),
            "dropnewest" | "drop" => Some(Self::DropNewest),
            _ => None,
        }
    }
}

/// Default capacity and overflow behaviour for queue-backed receivers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Maximum buffered messages per receiver.
    pub capacity: usize,
    /// Behaviour when full.
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::Block,
        }
    }
}
