//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WsSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WSCOMMS_*` environment overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{OverflowPolicy, WsSettings};

/// Resolve the path to the settings file.
///
/// `WSCOMMS_SETTINGS` wins; otherwise `~/.wscomms/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("WSCOMMS_SETTINGS") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wscomms").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<WsSettings> {
    let defaults = serde_json::to_value(WsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WsSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
/// Host, port and path apply to both the server and the client section.
pub fn apply_env_overrides(settings: &mut WsSettings) {
    if let Some(v) = read_env_string("WSCOMMS_HOST") {
        settings.server.host.clone_from(&v);
        settings.client.host = v;
    }
    if let Some(v) = read_env_u16("WSCOMMS_PORT", 1, 65535) {
        settings.server.port = v;
        settings.client.port = v;
    }
    if let Some(v) = read_env_string("WSCOMMS_PATH") {
        settings.server.path.clone_from(&v);
        settings.client.path = v;
    }
    if let Some(v) = read_env_usize("WSCOMMS_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_usize("WSCOMMS_QUEUE_CAPACITY", 1, 10_000_000) {
        settings.queue.capacity = v;
    }
    if let Some(val) = read_env_string("WSCOMMS_QUEUE_OVERFLOW") {
        match OverflowPolicy::parse(&val) {
            Some(policy) => settings.queue.overflow = policy,
            None => tracing::warn!(key = "WSCOMMS_QUEUE_OVERFLOW", value = %val, "invalid overflow policy, ignoring"),
        }
    }
    if let Some(v) = read_env_u32("WSCOMMS_RECONNECT_MAX_RETRIES", 0, u32::MAX) {
        settings.client.reconnect.max_retries = Some(v);
    }
    if let Some(v) = read_env_string("WSCOMMS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("WSCOMMS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an unsigned integer within an inclusive range.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_ranged<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    read_env_ranged(name, min, max)
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    read_env_ranged(name, min, max)
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    read_env_ranged(name, min, max)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
