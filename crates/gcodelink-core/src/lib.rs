//! # gcodelink Core
//!
//! Core types shared by the gcodelink crates:
//! - the error taxonomy used by transports, sessions and the relay
//! - traffic events and the logging sink they are reported through
//! - the G-code program reader that feeds the job sender

pub mod error;
pub mod events;
pub mod program;

pub use error::{ConnectionError, Error, GcodeError, ProtocolError, Result};
pub use events::{
    printable, Direction, MemorySink, SharedSink, TracingSink, TrafficEvent, TrafficSink,
};
pub use program::{GcodeProgram, ProgramLine};
