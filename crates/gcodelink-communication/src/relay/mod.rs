//! Byte relay between one upstream device link and many local clients
//!
//! - [`listen_addr`]: listener address specifications (`tcp://`, `unix://`)
//! - [`multiplexer`]: the broadcast/forward loop

pub mod listen_addr;
pub mod multiplexer;

pub use listen_addr::{Accepted, ListenAddress, Listener, ANONYMOUS_PEER};
pub use multiplexer::{
    RelayMultiplexer, RelayOutcome, DEFAULT_CHUNK_SIZE, DEFAULT_CLIENT_QUEUE, DEFAULT_POLL_TIMEOUT,
};
