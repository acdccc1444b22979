//! # gcodelink
//!
//! Streams G-code to motion controllers and shares one device link between
//! several local clients.
//!
//! ## Architecture
//!
//! gcodelink is organized as a workspace with multiple crates:
//!
//! 1. **gcodelink-core** - Error types, traffic events and sinks, program reader
//! 2. **gcodelink-communication** - Line transport, firmware sessions, relay
//! 3. **gcodelink-settings** - Configuration files
//! 4. **gcodelink** - Command line front end and the job sender
//!
//! ## Supported firmware
//!
//! - **GRBL 0.9 / 1.1**: status-polled flow control, strict `ok` acknowledgment
//! - **Trinus**: checksummed lines with resend on corruption
//! - **Marlin**: checksummed lines, forgiving acknowledgment loop

pub mod cli;
pub mod sender;

pub use gcodelink_communication::{
    create_session, DeviceSession, Endpoint, FirmwareProtocol, LineTransport, ListenAddress,
    RelayMultiplexer, RelayOutcome,
};
pub use gcodelink_core::{Error, GcodeProgram, Result, TracingSink};
pub use gcodelink_settings::Config;
pub use sender::{JobReport, JobSender};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging on stderr with:
/// - `level` as the default filter, overridden by `RUST_LOG` when set
/// - JSON lines when `json` is true, human-readable output otherwise
///
/// Stdout is left alone; the relay may be using it as its upstream.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true);
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}
