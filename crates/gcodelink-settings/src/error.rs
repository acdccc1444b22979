//! Error types for the settings crate.

use std::io;
use thiserror::Error;

/// Errors that can occur while loading, validating or saving configuration.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration file could not be loaded.
    #[error("Failed to load settings from {path}: {reason}")]
    LoadError { path: String, reason: String },

    /// The configuration file could not be saved.
    #[error("Failed to save settings: {0}")]
    SaveError(String),

    /// A configuration value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// The file extension does not name a supported format.
    #[error("Unsupported config format: {0} (expected .toml or .json)")]
    UnsupportedFormat(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerError(#[from] toml::ser::Error),
}

impl SettingsError {
    /// Shorthand for [`SettingsError::InvalidSetting`]
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_setting_display() {
        let err = SettingsError::invalid("relay.chunk_size", "must be > 0");
        assert_eq!(err.to_string(), "Invalid setting 'relay.chunk_size': must be > 0");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: SettingsError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, SettingsError::IoError(_)));
    }
}
