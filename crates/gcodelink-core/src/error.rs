//! Error handling for gcodelink
//!
//! Provides error types for every layer of the link:
//! - Connection errors (transport endpoints, relay listeners)
//! - Protocol errors (firmware responses that abort a session)
//! - G-Code errors (reading the program that is streamed)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to the duplex byte stream behind a session or
/// the relay: TCP connections, helper process pipes and listeners.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open an endpoint
    #[error("Failed to open {endpoint}: {reason}")]
    FailedToOpen {
        /// The endpoint that failed to open.
        endpoint: String,
        /// The reason the endpoint failed to open.
        reason: String,
    },

    /// The peer closed the connection
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Address specification could not be understood
    #[error("Invalid address: {address}")]
    InvalidAddress {
        /// The address specification as given.
        address: String,
    },

    /// Operation attempted before `open()` or after `close()`
    #[error("Connection is not open")]
    NotOpen,

    /// I/O error
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Protocol error type
///
/// Raised by a device session when the firmware says something that makes
/// continuing unsafe. These are always fatal for the session.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// A response other than the only valid one was received
    #[error("Unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        /// The response that was required at this point.
        expected: String,
        /// The response that was actually received.
        actual: String,
    },

    /// A status line did not match the firmware's status grammar
    #[error("Malformed status report: {line}")]
    MalformedStatus {
        /// The offending status line.
        line: String,
    },

    /// The device reported an unrecoverable error
    #[error("Device error: {message}")]
    DeviceError {
        /// The error text reported by the device.
        message: String,
    },

    /// Protocol name not recognised
    #[error("Unknown protocol: {name}")]
    UnknownProtocol {
        /// The name that was not recognised.
        name: String,
    },
}

/// G-Code error type
///
/// Represents errors met while reading a program to stream.
#[derive(Error, Debug, Clone)]
pub enum GcodeError {
    /// A line cannot be transmitted as-is
    #[error("Invalid line {line_number}: {reason}")]
    InvalidLine {
        /// One-based line number in the source file.
        line_number: usize,
        /// The reason the line was rejected.
        reason: String,
    },

    /// The program file could not be read
    #[error("File error: {reason}")]
    FileError {
        /// The reason for the file error.
        reason: String,
    },
}

/// Main error type for gcodelink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// G-Code error
    #[error(transparent)]
    Gcode(#[from] GcodeError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a G-Code error
    pub fn is_gcode_error(&self) -> bool {
        matches!(self, Error::Gcode(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
