//! Line-oriented transport
//!
//! Frames an arbitrary byte stream into terminator-delimited text lines and
//! writes lines with the terminator appended, flushing every write.

use super::endpoint::{DuplexLink, Endpoint};
use gcodelink_core::{ConnectionError, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// Returned in place of a line that is not valid UTF-8
pub const UNDECODABLE_LINE: &str = "???";

/// Default time `read_line` waits before reporting that nothing arrived
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 256;

/// Line terminator used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineTerminator {
    /// Terminator bytes appended to every written line
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Duplex line framing over an endpoint
#[derive(Debug)]
pub struct LineTransport {
    endpoint: Option<Endpoint>,
    terminator: LineTerminator,
    read_timeout: Duration,
    link: Option<DuplexLink>,
    buffer: Vec<u8>,
}

impl LineTransport {
    /// Transport that connects to `endpoint` on `open()`
    pub fn new(endpoint: Endpoint, terminator: LineTerminator) -> Self {
        Self {
            endpoint: Some(endpoint),
            terminator,
            read_timeout: DEFAULT_READ_TIMEOUT,
            link: None,
            buffer: Vec::new(),
        }
    }

    /// Transport over an already open link; `open()` is a no-op
    pub fn from_link(link: DuplexLink, terminator: LineTerminator) -> Self {
        Self {
            endpoint: None,
            terminator,
            read_timeout: DEFAULT_READ_TIMEOUT,
            link: Some(link),
            buffer: Vec::new(),
        }
    }

    /// Set the timeout used when `read_line` is given none
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Terminator this transport frames with
    pub fn terminator(&self) -> LineTerminator {
        self.terminator
    }

    /// Change the terminator, e.g. once the firmware dialect is known
    pub fn set_terminator(&mut self, terminator: LineTerminator) {
        self.terminator = terminator;
    }

    /// Whether the underlying connection is open
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Connect to the configured endpoint
    pub async fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        let endpoint = self.endpoint.as_ref().ok_or(ConnectionError::NotOpen)?;
        self.link = Some(endpoint.connect().await?);
        self.buffer.clear();
        Ok(())
    }

    /// Close the connection, releasing sockets and helper processes
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        match self.link.take() {
            Some(link) => link.shutdown().await,
            None => Ok(()),
        }
    }

    /// Read one line, waiting at most `timeout` (or the default read timeout)
    ///
    /// Returns `Ok(None)` when no complete line arrived in time; partial
    /// data stays buffered for the next call. A closed peer is an error.
    pub async fn read_line(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout.unwrap_or(self.read_timeout);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }

            let link = self.link.as_mut().ok_or(ConnectionError::NotOpen)?;
            let read = tokio::time::timeout_at(deadline, link.reader.read(&mut chunk)).await;
            match read {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(ConnectionError::ConnectionLost {
                        reason: "peer closed the connection".to_string(),
                    }
                    .into())
                }
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(ConnectionError::Io {
                        reason: e.to_string(),
                    }
                    .into())
                }
            }
        }
    }

    /// Write `text` followed by the terminator and flush immediately
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let link = self.link.as_mut().ok_or(ConnectionError::NotOpen)?;
        let mut frame = Vec::with_capacity(text.len() + 2);
        frame.extend_from_slice(text.as_bytes());
        frame.extend_from_slice(self.terminator.as_bytes());

        link.writer.write_all(&frame).await.map_err(io_error)?;
        link.writer.flush().await.map_err(io_error)?;
        Ok(())
    }

    /// Split one line off the front of the buffer, if a full one is there
    ///
    /// Lines are split on LF; with a CRLF terminator the trailing CR is
    /// dropped as well.
    fn take_buffered_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
        raw.pop();
        if self.terminator == LineTerminator::CrLf && raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Some(String::from_utf8(raw).unwrap_or_else(|_| UNDECODABLE_LINE.to_string()))
    }
}

fn io_error(e: std::io::Error) -> ConnectionError {
    ConnectionError::Io {
        reason: e.to_string(),
    }
}
