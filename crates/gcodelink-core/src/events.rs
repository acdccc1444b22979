//! Traffic events and logging sinks
//!
//! Sessions and the relay never print. Everything they see on the wire is
//! reported as a [`TrafficEvent`] through the [`TrafficSink`] they were built
//! with, so tests can capture the exact sequence and the binary can route it
//! into `tracing`.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Which way the bytes of an event travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written towards the device (or upstream)
    Outbound,
    /// Read from the device (or a downstream client)
    Inbound,
    /// Local bookkeeping, nothing crossed the wire
    Local,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => write!(f, "tx"),
            Self::Inbound => write!(f, "rx"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Something observed on a device link or relay
#[derive(Debug, Clone, PartialEq)]
pub enum TrafficEvent {
    /// A line was transmitted; `original` is set when a transform changed it
    Sent {
        line: String,
        original: Option<String>,
    },
    /// Terminal acknowledgment for the line in flight
    Acknowledged(String),
    /// Line drained while opening the session
    Banner(String),
    /// Informational notice from the firmware
    Notice(String),
    /// Raw status report line
    Status(String),
    /// Device asked for the line in flight to be sent again
    ResendRequested(String),
    /// Device reported a fatal error
    DeviceError(String),
    /// Unrecognised chatter, ignored
    Ignored(String),
    /// Line dropped by the pre-send transform
    Suppressed(String),
    /// Relay accepted a downstream client
    ClientConnected { peer: String },
    /// Downstream client went away
    ClientDisconnected { peer: String },
    /// Bytes read from the relay upstream
    RelayUpstream(Vec<u8>),
    /// Bytes read from a relay downstream client
    RelayDownstream { peer: String, data: Vec<u8> },
    /// Relay upstream closed its side
    UpstreamClosed,
}

impl TrafficEvent {
    /// Direction of the bytes this event describes
    pub fn direction(&self) -> Direction {
        match self {
            Self::Sent { .. } | Self::RelayDownstream { .. } => Direction::Outbound,
            Self::Acknowledged(_)
            | Self::Banner(_)
            | Self::Notice(_)
            | Self::Status(_)
            | Self::ResendRequested(_)
            | Self::DeviceError(_)
            | Self::Ignored(_)
            | Self::RelayUpstream(_) => Direction::Inbound,
            Self::Suppressed(_)
            | Self::ClientConnected { .. }
            | Self::ClientDisconnected { .. }
            | Self::UpstreamClosed => Direction::Local,
        }
    }
}

/// Render relay payloads as text, escaping anything that is not UTF-8
pub fn printable(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => data.escape_ascii().to_string(),
    }
}

impl fmt::Display for TrafficEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent {
                line,
                original: Some(original),
            } => write!(f, "Now sending {} ({})", line, original),
            Self::Sent { line, original: None } => write!(f, "Now sending {}", line),
            Self::Acknowledged(line) => write!(f, "{}", line),
            Self::Banner(line) => write!(f, "banner: {}", line),
            Self::Notice(line) => write!(f, "notice: {}", line),
            Self::Status(line) => write!(f, "status: {}", line),
            Self::ResendRequested(line) => write!(f, "resend: {}", line),
            Self::DeviceError(line) => write!(f, "device error: {}", line),
            Self::Ignored(line) => write!(f, "ignored: {}", line),
            Self::Suppressed(line) => write!(f, "suppressed: {}", line),
            Self::ClientConnected { peer } => write!(f, "{} has connected", peer),
            Self::ClientDisconnected { peer } => write!(f, "{} has disconnected", peer),
            Self::RelayUpstream(data) => write!(f, "[gcode] {}", printable(data)),
            Self::RelayDownstream { peer, data } => write!(f, "[{}] {}", peer, printable(data)),
            Self::UpstreamClosed => write!(f, "gcode server has disconnected"),
        }
    }
}

/// Receiver of traffic events
///
/// Implement this trait to observe a session or relay.
pub trait TrafficSink: Send + Sync {
    /// Called for every event, in the order the component observed them
    fn record(&self, event: TrafficEvent);
}

/// Shared handle to a sink, as stored by sessions and relays
pub type SharedSink = Arc<dyn TrafficSink>;

/// Sink that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Shared handle to a tracing sink
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl TrafficSink for TracingSink {
    fn record(&self, event: TrafficEvent) {
        let direction = event.direction();
        match &event {
            TrafficEvent::DeviceError(line) => {
                tracing::error!(%direction, line = %line, "device error");
            }
            TrafficEvent::ResendRequested(line) => {
                tracing::warn!(%direction, line = %line, "resend requested");
            }
            TrafficEvent::Ignored(line) => {
                tracing::warn!(%direction, line = %line, "unrecognised response");
            }
            TrafficEvent::ClientConnected { peer } | TrafficEvent::ClientDisconnected { peer } => {
                tracing::info!(%direction, peer = %peer, "{}", event);
            }
            TrafficEvent::UpstreamClosed => tracing::info!(%direction, "{}", event),
            TrafficEvent::RelayUpstream(data) => {
                tracing::info!(%direction, peer = "gcode", bytes = data.len(), "{}", printable(data));
            }
            TrafficEvent::RelayDownstream { peer, data } => {
                tracing::info!(%direction, peer = %peer, bytes = data.len(), "{}", printable(data));
            }
            _ => tracing::info!(%direction, "{}", event),
        }
    }
}

/// Sink that keeps every event in memory
///
/// Used by tests to assert on exactly what a component reported.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TrafficEvent>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<TrafficEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&TrafficEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Lines transmitted so far, in order
    pub fn sent_lines(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TrafficEvent::Sent { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TrafficSink for MemorySink {
    fn record(&self, event: TrafficEvent) {
        self.events.lock().push(event);
    }
}
