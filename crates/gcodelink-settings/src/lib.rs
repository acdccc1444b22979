//! gcodelink Settings Crate
//!
//! Configuration file model for the `send` and `relay` commands, loaded from
//! TOML or JSON in the platform configuration directory.

pub mod config;
pub mod error;

pub use config::{Config, ConnectionSettings, LoggingSettings, RelaySettings, SessionSettings};
pub use error::{Result, SettingsError};
