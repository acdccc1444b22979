//! Marlin Session
//!
//! Same checksummed lines as Trinus, but a forgiving acknowledgment loop:
//! `echo:` lines are notices, `ok` ends the wait and everything else is
//! ignored. There is no resend; a corrupted line is absorbed as chatter.

use super::preprocess::{shorten, Prepared};
use super::{flush_and_drain, next_line, DeviceSession, FirmwareProtocol, SessionTiming};
use crate::communication::{LineTerminator, LineTransport};
use async_trait::async_trait;
use gcodelink_core::{Result, SharedSink, TrafficEvent};
use std::collections::VecDeque;

/// Session for Marlin firmware
pub struct MarlinSession {
    transport: LineTransport,
    sink: SharedSink,
    timing: SessionTiming,
    notices: VecDeque<String>,
}

impl MarlinSession {
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
}

#[async_trait]
impl DeviceSession for MarlinSession {
    fn protocol(&self) -> FirmwareProtocol {
        FirmwareProtocol::Marlin
    }

    async fn open(&mut self, initial: bool) -> Result<()> {
        self.transport.open().await?;
        if initial {
            tracing::info!("Initializing marlin...");
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

        self.transport.write_line(&out).await?;
        self.sink.record(TrafficEvent::Sent {
            line: out,
            original: Some(line.to_string()),
        });

        loop {
            let res = next_line(&mut self.transport, self.timing.read_retry).await?;
            if res == "ok" {
                self.sink.record(TrafficEvent::Acknowledged(res.clone()));
                return Ok(Some(res));
            }
            if res.starts_with("echo:") {
                self.sink.record(TrafficEvent::Notice(res.clone()));
                self.notices.push_back(res);
            } else {
                self.sink.record(TrafficEvent::Ignored(res));
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
