//! # gcodelink Communication
//!
//! Device links for G-code streaming.
//! Frames TCP or helper-process byte streams into lines, drives GRBL,
//! Trinus and Marlin firmware one acknowledged line at a time, and relays
//! one upstream link to many local clients.

pub mod communication;
pub mod firmware;
pub mod relay;

pub use communication::{
    DuplexLink, Endpoint, LineTerminator, LineTransport, DEFAULT_READ_TIMEOUT, UNDECODABLE_LINE,
};

pub use firmware::{
    create_session, DeviceSession, FirmwareProtocol, GrblSession, GrblVersion, MarlinSession,
    SessionTiming, StatusReport, TrinusSession,
};

pub use relay::{ListenAddress, RelayMultiplexer, RelayOutcome};
