//! Trinus Session
//!
//! Trinus printers take checksummed lines and answer a corrupted one with
//! `[ERROR] invalid checksum`, in which case the identical line is sent again.
//! Every other `[ERROR]` is fatal.

use super::preprocess::{shorten, Prepared};
use super::{flush_and_drain, next_line, DeviceSession, FirmwareProtocol, SessionTiming};
use crate::communication::{LineTerminator, LineTransport};
use async_trait::async_trait;
use gcodelink_core::{ProtocolError, Result, SharedSink, TrafficEvent};
use std::collections::VecDeque;

/// Response that asks for the line in flight to be sent again
pub const CHECKSUM_ERROR: &str = "[ERROR] invalid checksum";

/// Classified Trinus response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrinusResponse {
    /// Line arrived corrupted, resend it
    ChecksumError,
    /// Any other `[ERROR]`, fatal
    Error,
    /// `[ECHO]` or `[VALUE]` information
    Info,
    /// Line accepted
    Ok,
    /// Unrecognised chatter
    Other,
}

/// Classify one received line
pub fn classify(line: &str) -> TrinusResponse {
    if line == CHECKSUM_ERROR {
        TrinusResponse::ChecksumError
    } else if line.starts_with("[ERROR]") {
        TrinusResponse::Error
    } else if line.starts_with("[ECHO]") || line.starts_with("[VALUE]") {
        TrinusResponse::Info
    } else if line == "ok" {
        TrinusResponse::Ok
    } else {
        TrinusResponse::Other
    }
}

/// Session for Trinus firmware
pub struct TrinusSession {
    transport: LineTransport,
    sink: SharedSink,
    timing: SessionTiming,
    notices: VecDeque<String>,
}

impl TrinusSession {
    /// Create a session; the transport is switched to LF framing
    pub fn new(mut transport: LineTransport, sink: SharedSink, timing: SessionTiming) -> Self {
        transport.set_terminator(LineTerminator::Lf);
        Self {
            transport,
            sink,
            timing,
            notices: VecDeque::new(),
        }
    }

    /// Read responses until `ok`; returns whether a resend was requested
    async fn await_ok(&mut self) -> Result<(String, bool)> {
        let mut resend = false;
        loop {
            let line = next_line(&mut self.transport, self.timing.read_retry).await?;
            match classify(&line) {
                TrinusResponse::ChecksumError => {
                    self.sink.record(TrafficEvent::ResendRequested(line));
                    resend = true;
                }
                TrinusResponse::Error => {
                    self.sink.record(TrafficEvent::DeviceError(line.clone()));
                    self.notices.push_back(line.clone());
                    return Err(ProtocolError::DeviceError { message: line }.into());
                }
                TrinusResponse::Info => {
                    self.sink.record(TrafficEvent::Notice(line.clone()));
                    self.notices.push_back(line);
                }
                TrinusResponse::Ok => {
                    self.sink.record(TrafficEvent::Acknowledged(line.clone()));
                    return Ok((line, resend));
                }
                TrinusResponse::Other => self.sink.record(TrafficEvent::Ignored(line)),
            }
        }
    }
}

#[async_trait]
impl DeviceSession for TrinusSession {
    fn protocol(&self) -> FirmwareProtocol {
        FirmwareProtocol::Trinus
    }

    async fn open(&mut self, initial: bool) -> Result<()> {
        self.transport.open().await?;
        if initial {
            tracing::info!("Initializing trinus...");
            flush_and_drain(&mut self.transport, &self.sink).await?;
        }
        Ok(())
    }

    async fn queue(&mut self, line: &str) -> Result<Option<String>> {
        let out = match shorten(line) {
            Prepared::Transmit(out) => out,
            Prepared::Suppressed => {
                self.sink.record(TrafficEvent::Suppressed(line.to_string()));
                return Ok(None);
            }
        };

        loop {
            self.transport.write_line(&out).await?;
            self.sink.record(TrafficEvent::Sent {
                line: out.clone(),
                original: Some(line.to_string()),
            });

            let (ack, resend) = self.await_ok().await?;
            if !resend {
                return Ok(Some(ack));
            }
        }
    }

    async fn finish(&mut self) -> Result<()> {
        tracing::warn!("Caution, wait for remaining commands to be purged!");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    fn notices(&self) -> &VecDeque<String> {
        &self.notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("[ERROR] invalid checksum"), TrinusResponse::ChecksumError);
        assert_eq!(classify("[ERROR] temperature"), TrinusResponse::Error);
        assert_eq!(classify("[ECHO] G28"), TrinusResponse::Info);
        assert_eq!(classify("[VALUE] T:200"), TrinusResponse::Info);
        assert_eq!(classify("ok"), TrinusResponse::Ok);
        assert_eq!(classify("ok "), TrinusResponse::Other);
        assert_eq!(classify("busy"), TrinusResponse::Other);
    }
}
