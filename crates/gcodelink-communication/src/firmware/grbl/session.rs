//! GRBL Session
//!
//! Drives a GRBL 0.9 or 1.1 controller one line at a time. Before every
//! line the session polls `?` until the reported buffers leave room for it,
//! then waits for the literal `ok`. Notices (`[...]`) and status reports
//! (`<...>`) that arrive in between are kept in the session state.

use super::error_decoder::describe_rejection;
use super::{GrblVersion, StatusReport};
use crate::communication::{LineTerminator, LineTransport};
use crate::firmware::{flush_and_drain, next_line, DeviceSession, FirmwareProtocol, SessionTiming};
use async_trait::async_trait;
use gcodelink_core::{ProtocolError, Result, SharedSink, TrafficEvent};
use std::collections::VecDeque;
use std::time::Duration;

/// Real-time status query
pub const STATUS_QUERY: &str = "?";

/// Program end; GRBL prints extra lines after acknowledging it
const PROGRAM_END: &str = "M2";
const PROGRAM_END_EXTRA_LINES: usize = 4;

/// What a received line is, as far as the session is concerned
enum Chatter {
    Notice,
    Status,
    Other,
}

fn classify(line: &str) -> Chatter {
    if line.starts_with('[') && line.ends_with(']') {
        Chatter::Notice
    } else if line.starts_with('<') && line.ends_with('>') {
        Chatter::Status
    } else {
        Chatter::Other
    }
}

/// Session for GRBL firmware
pub struct GrblSession {
    version: GrblVersion,
    transport: LineTransport,
    sink: SharedSink,
    timing: SessionTiming,
    notices: VecDeque<String>,
    last_status_line: Option<String>,
    last_status: Option<StatusReport>,
}

impl GrblSession {
    /// Create a session; the transport is switched to CRLF framing
    pub fn new(
        version: GrblVersion,
        mut transport: LineTransport,
        sink: SharedSink,
        timing: SessionTiming,
    ) -> Self {
        transport.set_terminator(LineTerminator::CrLf);
        Self {
            version,
            transport,
            sink,
            timing,
            notices: VecDeque::new(),
            last_status_line: None,
            last_status: None,
        }
    }

    /// Firmware generation this session speaks
    pub fn version(&self) -> GrblVersion {
        self.version
    }

    /// Last report returned by [`status`](Self::status)
    ///
    /// Only as fresh as the last poll; the device keeps draining its buffers
    /// in between.
    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    /// Raw text of the last status line seen
    pub fn last_status_line(&self) -> Option<&str> {
        self.last_status_line.as_deref()
    }

    /// Query and parse one status report
    ///
    /// A status line that does not match the version's grammar is fatal.
    pub async fn status(&mut self) -> Result<StatusReport> {
        let line = self.query_status_line().await?;
        let report = self
            .version
            .parse_status(&line)
            .ok_or(ProtocolError::MalformedStatus { line })?;
        self.last_status = Some(report.clone());
        Ok(report)
    }

    /// Poll status every `poll_delay` until `predicate` holds
    pub async fn wait_status<F>(&mut self, mut predicate: F, poll_delay: Duration) -> Result<StatusReport>
    where
        F: FnMut(&StatusReport) -> bool + Send,
    {
        loop {
            let report = self.status().await?;
            if predicate(&report) {
                return Ok(report);
            }
            tracing::trace!(state = %report.state, cmdbuf = report.cmdbuf, rxbuf = report.rxbuf, "waiting");
            tokio::time::sleep(poll_delay).await;
        }
    }

    /// Send `?` and read until a status-shaped line shows up
    async fn query_status_line(&mut self) -> Result<String> {
        self.last_status_line = None;
        self.transmit(STATUS_QUERY).await?;

        loop {
            let line = next_line(&mut self.transport, self.timing.read_retry).await?;
            match classify(&line) {
                Chatter::Notice => self.keep_notice(line),
                Chatter::Status => {
                    self.sink.record(TrafficEvent::Status(line.clone()));
                    self.last_status_line = Some(line.clone());
                    return Ok(line);
                }
                Chatter::Other => self.sink.record(TrafficEvent::Ignored(line)),
            }
        }
    }

    async fn transmit(&mut self, line: &str) -> Result<()> {
        self.transport.write_line(line).await?;
        self.sink.record(TrafficEvent::Sent {
            line: line.to_string(),
            original: None,
        });
        Ok(())
    }

    fn keep_notice(&mut self, line: String) {
        self.sink.record(TrafficEvent::Notice(line.clone()));
        self.notices.push_back(line);
    }

    /// Wait for the terminal response to the line in flight; only `ok` is accepted
    async fn await_ok(&mut self) -> Result<String> {
        loop {
            let line = next_line(&mut self.transport, self.timing.read_retry).await?;
            match classify(&line) {
                Chatter::Notice => self.keep_notice(line),
                Chatter::Status => {
                    self.sink.record(TrafficEvent::Status(line.clone()));
                    self.last_status_line = Some(line);
                }
                Chatter::Other if line == "ok" => {
                    self.sink.record(TrafficEvent::Acknowledged(line.clone()));
                    return Ok(line);
                }
                Chatter::Other => {
                    self.sink.record(TrafficEvent::DeviceError(line.clone()));
                    return Err(match describe_rejection(&line) {
                        Some(message) => ProtocolError::DeviceError { message },
                        None => ProtocolError::UnexpectedResponse {
                            expected: "ok".to_string(),
                            actual: line,
                        },
                    }
                    .into());
                }
            }
        }
    }

    /// Read the lines GRBL prints after a program end, stopping early on silence
    async fn drain_program_end(&mut self) -> Result<()> {
        for _ in 0..PROGRAM_END_EXTRA_LINES {
            match self.transport.read_line(None).await? {
                Some(line) => self.sink.record(TrafficEvent::Banner(line)),
                None => break,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for GrblSession {
    fn protocol(&self) -> FirmwareProtocol {
        match self.version {
            GrblVersion::V0_9 => FirmwareProtocol::Grbl09,
            GrblVersion::V1_1 => FirmwareProtocol::Grbl,
        }
    }

    async fn open(&mut self, initial: bool) -> Result<()> {
        self.transport.open().await?;
        if initial {
            tracing::info!("Initializing grbl...");
            flush_and_drain(&mut self.transport, &self.sink).await?;
        }
        Ok(())
    }

    async fn queue(&mut self, line: &str) -> Result<Option<String>> {
        if line == STATUS_QUERY {
            self.status().await?;
            return Ok(self.last_status_line.clone());
        }

        let version = self.version;
        let pending = line.len();
        self.wait_status(
            move |report| version.can_send(report, pending),
            self.timing.queue_full_retry,
        )
        .await?;

        self.transmit(line).await?;
        let ack = self.await_ok().await?;

        if line.trim().eq_ignore_ascii_case(PROGRAM_END) {
            self.drain_program_end().await?;
        }

        Ok(Some(ack))
    }

    async fn finish(&mut self) -> Result<()> {
        let poll = self.timing.idle_poll;
        let report = self
            .wait_status(|report| report.is_idle() || report.is_alarm(), poll)
            .await?;
        if report.is_alarm() {
            return Err(ProtocolError::DeviceError {
                message: format!("machine in {} state, reset required", report.state),
            }
            .into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }

    fn notices(&self) -> &VecDeque<String> {
        &self.notices
    }
}
