//! Firmware sessions for the supported controllers
//!
//! Supported firmwares:
//! - GRBL 0.9 and 1.1: status-polled flow control, strict `ok` acknowledgment
//! - Trinus: checksummed lines with resend on corruption
//! - Marlin: checksummed lines, forgiving acknowledgment loop
//!
//! Every firmware implements [`DeviceSession`]; [`create_session`] picks the
//! implementation for a [`FirmwareProtocol`].

pub mod grbl;
pub mod marlin;
pub mod preprocess;
pub mod trinus;

pub use grbl::{GrblSession, GrblVersion, StatusReport};
pub use marlin::MarlinSession;
pub use trinus::TrinusSession;

use crate::communication::{LineTerminator, LineTransport};
use async_trait::async_trait;
use gcodelink_core::{ProtocolError, Result, SharedSink, TrafficEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

/// Firmware dialect spoken on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareProtocol {
    /// GRBL 1.1 (default)
    #[default]
    Grbl,
    /// GRBL 0.9
    Grbl09,
    /// Trinus
    Trinus,
    /// Marlin
    Marlin,
}

impl std::fmt::Display for FirmwareProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grbl => write!(f, "grbl"),
            Self::Grbl09 => write!(f, "grbl09"),
            Self::Trinus => write!(f, "trinus"),
            Self::Marlin => write!(f, "marlin"),
        }
    }
}

impl FromStr for FirmwareProtocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grbl" | "grbl11" | "grbl1.1" => Ok(Self::Grbl),
            "grbl09" | "grbl0.9" => Ok(Self::Grbl09),
            "trinus" => Ok(Self::Trinus),
            "marlin" => Ok(Self::Marlin),
            _ => Err(ProtocolError::UnknownProtocol {
                name: s.to_string(),
            }),
        }
    }
}

impl FirmwareProtocol {
    /// Line terminator this firmware expects
    pub fn terminator(&self) -> LineTerminator {
        match self {
            Self::Grbl | Self::Grbl09 => LineTerminator::CrLf,
            Self::Trinus | Self::Marlin => LineTerminator::Lf,
        }
    }
}

/// Poll and retry intervals used by sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Sleep between status polls while the device buffer is full
    pub queue_full_retry: Duration,
    /// Sleep between status polls while waiting for idle at end of job
    pub idle_poll: Duration,
    /// Sleep after a read timed out before reading again
    pub read_retry: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            queue_full_retry: Duration::from_millis(300),
            idle_poll: Duration::from_secs(1),
            read_retry: Duration::from_millis(100),
        }
    }
}

/// Protocol engine for one device connection
///
/// `queue` is single-flight: it returns only once the line it sent has been
/// accepted by the firmware or a fatal condition was raised.
#[async_trait]
pub trait DeviceSession: Send {
    /// Firmware dialect of this session
    fn protocol(&self) -> FirmwareProtocol;

    /// Open the transport; with `initial`, flush the firmware's input and
    /// drain its banner
    async fn open(&mut self, initial: bool) -> Result<()>;

    /// Send one command line and wait for its acknowledgment
    ///
    /// Returns the acknowledgment text, or `None` when the line was dropped
    /// by the firmware's pre-send transform and nothing was transmitted.
    async fn queue(&mut self, line: &str) -> Result<Option<String>>;

    /// End-of-job hook, called after the last line was queued
    async fn finish(&mut self) -> Result<()>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;

    /// Informational notices received so far
    fn notices(&self) -> &VecDeque<String>;
}

/// Build the session implementation for `protocol`
///
/// The transport's terminator is set to the one the firmware expects.
pub fn create_session(
    protocol: FirmwareProtocol,
    mut transport: LineTransport,
    sink: SharedSink,
    timing: SessionTiming,
) -> Box<dyn DeviceSession> {
    transport.set_terminator(protocol.terminator());
    match protocol {
        FirmwareProtocol::Grbl => Box::new(GrblSession::new(
            GrblVersion::V1_1,
            transport,
            sink,
            timing,
        )),
        FirmwareProtocol::Grbl09 => Box::new(GrblSession::new(
            GrblVersion::V0_9,
            transport,
            sink,
            timing,
        )),
        FirmwareProtocol::Trinus => Box::new(TrinusSession::new(transport, sink, timing)),
        FirmwareProtocol::Marlin => Box::new(MarlinSession::new(transport, sink, timing)),
    }
}

/// Send two empty lines so the firmware discards any partial input, then
/// drain whatever it prints until a read times out
pub(crate) async fn flush_and_drain(transport: &mut LineTransport, sink: &SharedSink) -> Result<()> {
    transport.write_line("").await?;
    transport.write_line("").await?;
    while let Some(line) = transport.read_line(None).await? {
        sink.record(TrafficEvent::Banner(line));
    }
    Ok(())
}

/// Read until a line arrives, sleeping `retry` after each timeout
pub(crate) async fn next_line(transport: &mut LineTransport, retry: Duration) -> Result<String> {
    loop {
        match transport.read_line(None).await? {
            Some(line) => return Ok(line),
            None => tokio::time::sleep(retry).await,
        }
    }
}
