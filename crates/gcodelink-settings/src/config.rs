//! Configuration for gcodelink
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in the platform configuration
//! directory.
//!
//! Configuration is organized into sections:
//! - Connection (bridge host/port or helper command, read timeout)
//! - Session (firmware protocol, poll and retry intervals)
//! - Relay (listen address, chunk size, upstream helper command or TCP address)
//! - Logging (level, JSON output)
//!
//! Every field has a default, so a file only needs the values it changes.

use crate::error::{Result, SettingsError};
use gcodelink_communication::{Endpoint, FirmwareProtocol, ListenAddress, SessionTiming};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Directory under the platform configuration directory
pub const APP_DIR: &str = "gcodelink";
/// File name of the default configuration
pub const CONFIG_FILE: &str = "config.toml";

/// Device connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Bridge hostname
    pub host: String,
    /// Bridge TCP port
    pub port: u16,
    /// Helper command whose stdio is the device link; overrides host/port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// How long a single line read waits, in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9999,
            command: None,
            read_timeout_ms: 2000,
        }
    }
}

impl ConnectionSettings {
    /// Endpoint these settings select
    pub fn endpoint(&self) -> Endpoint {
        match &self.command {
            Some(argv) => Endpoint::process(argv.iter().cloned()),
            None => Endpoint::tcp(self.host.clone(), self.port),
        }
    }

    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Device session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Firmware protocol
    pub protocol: FirmwareProtocol,
    /// Status poll interval while the device buffer is full, in milliseconds
    pub queue_full_retry_ms: u64,
    /// Status poll interval while waiting for idle, in milliseconds
    pub idle_poll_ms: u64,
    /// Pause after a read timed out, in milliseconds
    pub read_retry_ms: u64,
    /// Flush the firmware input and drain its banner on open
    pub initialize: bool,
    /// Wait for the machine to go idle after the last line
    pub wait_idle_on_finish: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let timing = SessionTiming::default();
        Self {
            protocol: FirmwareProtocol::default(),
            queue_full_retry_ms: timing.queue_full_retry.as_millis() as u64,
            idle_poll_ms: timing.idle_poll.as_millis() as u64,
            read_retry_ms: timing.read_retry.as_millis() as u64,
            initialize: false,
            wait_idle_on_finish: true,
        }
    }
}

impl SessionSettings {
    /// Poll and retry intervals for the session
    pub fn timing(&self) -> SessionTiming {
        SessionTiming {
            queue_full_retry: Duration::from_millis(self.queue_full_retry_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            read_retry: Duration::from_millis(self.read_retry_ms),
        }
    }
}

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Listen address specification (`tcp://host:port`, `unix:///path`)
    pub listen: String,
    /// Largest single read, in bytes
    pub chunk_size: usize,
    /// Interval of the trace-level idle record, in milliseconds
    pub poll_timeout_ms: u64,
    /// Helper command providing the upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// TCP upstream (`tcp://host:port`)
    ///
    /// With neither this nor `command`, the upstream is stdin/stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen: ListenAddress::default().to_string(),
            chunk_size: 4096,
            poll_timeout_ms: 1000,
            command: None,
            upstream: None,
        }
    }
}

impl RelaySettings {
    /// Parsed listen address
    pub fn listen_address(&self) -> Result<ListenAddress> {
        ListenAddress::from_str(&self.listen)
            .map_err(|e| SettingsError::invalid("relay.listen", e.to_string()))
    }

    /// Upstream endpoint; `None` means this process's stdin/stdout
    pub fn upstream_endpoint(&self) -> Result<Option<Endpoint>> {
        match (&self.command, &self.upstream) {
            (Some(_), Some(_)) => Err(SettingsError::invalid(
                "relay.upstream",
                "conflicts with relay.command",
            )),
            (Some(argv), None) => Ok(Some(Endpoint::process(argv.iter().cloned()))),
            (None, Some(address)) => match ListenAddress::from_str(address) {
                Ok(ListenAddress::Tcp { host, port }) => Ok(Some(Endpoint::tcp(host, port))),
                _ => Err(SettingsError::invalid(
                    "relay.upstream",
                    format!("expected tcp://host:port, got '{}'", address),
                )),
            },
            (None, None) => Ok(None),
        }
    }

    /// Idle reporting interval as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level filter (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
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

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device connection
    pub connection: ConnectionSettings,
    /// Device session
    pub session: SessionSettings,
    /// Relay
    pub relay: RelaySettings,
    /// Logging
    pub logging: LoggingSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(SettingsError::UnsupportedFormat(path.display().to_string())),
    }
}

fn require_positive(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(SettingsError::invalid(key, "must be > 0"));
    }
    Ok(())
}

fn require_command(key: &str, command: &Option<Vec<String>>) -> Result<()> {
    match command {
        Some(argv) if argv.first().map_or(true, |program| program.trim().is_empty()) => {
            Err(SettingsError::invalid(key, "command must name a program"))
        }
        _ => Ok(()),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the default file when `path` is `None`
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.port == 0 {
            return Err(SettingsError::invalid("connection.port", "must be > 0"));
        }
        require_positive("connection.read_timeout_ms", self.connection.read_timeout_ms)?;
        require_command("connection.command", &self.connection.command)?;

        require_positive("session.queue_full_retry_ms", self.session.queue_full_retry_ms)?;
        require_positive("session.idle_poll_ms", self.session.idle_poll_ms)?;
        require_positive("session.read_retry_ms", self.session.read_retry_ms)?;

        self.relay.listen_address()?;
        require_positive("relay.chunk_size", self.relay.chunk_size as u64)?;
        require_positive("relay.poll_timeout_ms", self.relay.poll_timeout_ms)?;
        require_command("relay.command", &self.relay.command)?;
        self.relay.upstream_endpoint()?;

        if tracing::Level::from_str(&self.logging.level).is_err() {
            return Err(SettingsError::invalid(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 9999);
        assert_eq!(config.session.protocol, FirmwareProtocol::Grbl);
        assert_eq!(config.session.queue_full_retry_ms, 300);
        assert_eq!(config.session.idle_poll_ms, 1000);
        assert_eq!(config.relay.listen, "tcp://localhost:9999");
        assert_eq!(config.relay.chunk_size, 4096);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            protocol = "trinus"

            [connection]
            command = ["grbl-sim", "-n"]
            "#,
        )
        .unwrap();
        assert_eq!(config.session.protocol, FirmwareProtocol::Trinus);
        assert_eq!(config.session.read_retry_ms, 100);
        assert_eq!(
            config.connection.endpoint(),
            Endpoint::process(["grbl-sim", "-n"])
        );
        assert_eq!(config.relay, RelaySettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::new();
        config.relay.listen = "udp://localhost:1".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.session.idle_poll_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.connection.command = Some(vec![]);
        assert!(config.validate().is_err());

        let mut config = Config::new();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_upstream_selection() {
        let mut relay = RelaySettings::default();
        assert_eq!(relay.upstream_endpoint().unwrap(), None);

        relay.upstream = Some("tcp://cnc.local:23".to_string());
        assert_eq!(
            relay.upstream_endpoint().unwrap(),
            Some(Endpoint::tcp("cnc.local", 23))
        );

        relay.command = Some(vec!["socat".to_string()]);
        assert!(relay.upstream_endpoint().is_err());

        relay.command = None;
        relay.upstream = Some("cnc.local:23".to_string());
        assert!(relay.upstream_endpoint().is_err());
    }

    #[test]
    fn test_session_timing() {
        let timing = SessionSettings::default().timing();
        assert_eq!(timing, SessionTiming::default());
    }
}
