//! # wscomms-settings
//!
//! Configuration for wscomms endpoints, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`WsSettings::default()`]
//! 2. **User file**: `~/.wscomms/settings.json` or `$WSCOMMS_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `WSCOMMS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = WsSettings::default();
        let _policy = OverflowPolicy::Block;
        let _path = settings_path();
        let _reserved = RESERVED_PATHS;
    }

    #[test]
    fn default_settings_match_demo_scenario() {
        let settings = WsSettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.client.host, "localhost");
        assert_eq!(settings.client.port, 8080);
    }
}
