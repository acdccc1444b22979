//! Byte-stream plumbing shared by device sessions and the relay
//!
//! - [`endpoint`]: TCP and helper-process endpoints, opened into duplex links
//! - [`line_transport`]: line framing on top of a duplex link

pub mod endpoint;
pub mod line_transport;

pub use endpoint::{reap, BoxedReader, BoxedWriter, DuplexLink, Endpoint};
pub use line_transport::{
    LineTerminator, LineTransport, DEFAULT_READ_TIMEOUT, UNDECODABLE_LINE,
};
