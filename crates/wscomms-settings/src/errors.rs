//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings layer could not be applied.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not JSON, or does not fit the settings shape.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A key holds a value no endpoint can run with.
    #[error("{key}: {reason}")]
    Rejected {
        /// Dotted camelCase key, e.g. `server.path`.
        key: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn rejected(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            key,
            reason: reason.into(),
        }
    }
}

/// Result alias for loading and validating settings.
pub type Result<T> = std::result::Result<T, SettingsError>;
