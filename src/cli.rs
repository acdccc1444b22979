//! CLI argument parsing with clap derive macros.

use clap::{Parser, Subcommand};
use gcodelink_communication::FirmwareProtocol;
use gcodelink_settings::Config;
use std::path::PathBuf;

/// Stream G-code to motion controllers.
///
/// Sends programs to GRBL, Trinus and Marlin firmware over a TCP bridge or a
/// helper process, and relays one device link to several local clients.
#[derive(Debug, Parser)]
#[command(name = "gcodelink", version)]
pub struct Cli {
    /// Configuration file (.toml or .json) [default: platform config dir]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a G-code file to a device
    #[command(after_help = "\
Examples:
  gcodelink send part.gcode                          # GRBL 1.1 bridge on localhost:9999
  gcodelink send --protocol trinus print.gcode       # Trinus printer
  gcodelink send --host cnc.local --port 23 part.nc  # Remote bridge
  gcodelink send part.gcode -- grbl-sim -n           # Helper process stdio as the link")]
    Send(SendArgs),

    /// Share one device link with several TCP clients
    #[command(after_help = "\
Examples:
  gcodelink relay socat - /dev/ttyUSB0,b115200,raw  # Helper process as upstream
  gcodelink relay --listen tcp://0.0.0.0:9999 -- ssh cnc grbl-bridge
  gcodelink relay --upstream tcp://cnc.local:23     # TCP bridge as upstream
  gcodelink relay                                    # This process's stdin/stdout as upstream")]
    Relay(RelayArgs),
}

#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// Firmware protocol (grbl, grbl09, trinus, marlin)
    #[arg(long, value_name = "PROTOCOL")]
    pub protocol: Option<FirmwareProtocol>,

    /// Bridge hostname
    #[arg(long)]
    pub host: Option<String>,

    /// Bridge TCP port
    #[arg(long)]
    pub port: Option<u16>,

    /// Flush the firmware input and drain its banner before sending
    #[arg(long)]
    pub init: bool,

    /// Do not wait for the machine to go idle after the last line
    #[arg(long)]
    pub no_wait_idle: bool,

    /// G-code file to send
    pub file: PathBuf,

    /// Helper command whose stdin/stdout is the device link
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct RelayArgs {
    /// Listen address (tcp://host:port or unix:///path)
    #[arg(long, value_name = "SPEC")]
    pub listen: Option<String>,

    /// TCP upstream (tcp://host:port) instead of a helper command
    #[arg(long, value_name = "ADDRESS")]
    pub upstream: Option<String>,

    /// Helper command providing the upstream; stdin/stdout when omitted
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Fold the global flags into `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

impl SendArgs {
    /// Fold the send flags into `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(protocol) = self.protocol {
            config.session.protocol = protocol;
        }
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
            config.connection.command = None;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
            config.connection.command = None;
        }
        if !self.command.is_empty() {
            config.connection.command = Some(self.command.clone());
        }
        if self.init {
            config.session.initialize = true;
        }
        if self.no_wait_idle {
            config.session.wait_idle_on_finish = false;
        }
    }
}

impl RelayArgs {
    /// Fold the relay flags into `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(listen) = &self.listen {
            config.relay.listen = listen.clone();
        }
        if let Some(upstream) = &self.upstream {
            config.relay.upstream = Some(upstream.clone());
            config.relay.command = None;
        }
        if !self.command.is_empty() {
            config.relay.command = Some(self.command.clone());
            if self.upstream.is_none() {
                config.relay.upstream = None;
            }
        }
    }
}
