//! Duplex endpoints
//!
//! An endpoint is where a device link's bytes come from and go to: a TCP
//! connection to a bridge, or the standard I/O pair of a spawned helper
//! process. Opening one yields a [`DuplexLink`] that owns every handle it
//! needs, so dropping the link releases the socket and terminates the helper.

use gcodelink_core::{ConnectionError, Result};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

/// Boxed read half of a duplex link
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Boxed write half of a duplex link
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// How long a helper process gets to exit on its own after its stdin closes
const HELPER_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Where a link connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP connection to `host:port`
    Tcp { host: String, port: u16 },
    /// Standard input/output of a spawned helper process
    Process { argv: Vec<String> },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Self::Process { argv } => write!(f, "process `{}`", argv.join(" ")),
        }
    }
}

impl Endpoint {
    /// TCP endpoint
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Helper process endpoint
    pub fn process<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Process {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Open the endpoint
    pub async fn connect(&self) -> Result<DuplexLink> {
        match self {
            Self::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| self.open_error(e))?;
                // Every line is written as soon as it is produced.
                stream.set_nodelay(true).map_err(|e| self.open_error(e))?;
                tracing::debug!("Connected to {}", self);
                let (reader, writer) = stream.into_split();
                Ok(DuplexLink::from_stream(reader, writer))
            }
            Self::Process { argv } => {
                let (program, args) = argv.split_first().ok_or_else(|| {
                    ConnectionError::FailedToOpen {
                        endpoint: self.to_string(),
                        reason: "empty command line".to_string(),
                    }
                })?;

                let mut child = Command::new(program)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| self.open_error(e))?;

                let stdin = child.stdin.take().ok_or_else(|| self.open_error("no stdin pipe"))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| self.open_error("no stdout pipe"))?;
                tracing::debug!("Spawned {} (pid {:?})", self, child.id());

                Ok(DuplexLink {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    child: Some(child),
                })
            }
        }
    }

    fn open_error(&self, reason: impl fmt::Display) -> ConnectionError {
        ConnectionError::FailedToOpen {
            endpoint: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// An open duplex byte stream
///
/// Owns the read half, the write half and, for helper processes, the child.
pub struct DuplexLink {
    /// Bytes from the peer
    pub reader: BoxedReader,
    /// Bytes to the peer
    pub writer: BoxedWriter,
    child: Option<Child>,
}

impl fmt::Debug for DuplexLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexLink")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

impl DuplexLink {
    /// Wrap an already connected stream pair
    pub fn from_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// This process's own standard input/output
    pub fn stdio() -> Self {
        Self::from_stream(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Split into halves, keeping the helper process guard alive separately
    pub fn into_parts(self) -> (BoxedReader, BoxedWriter, Option<Child>) {
        (self.reader, self.writer, self.child)
    }

    /// Close the write side and reap the helper process, if any
    ///
    /// A helper that does not exit within a short grace period after its
    /// stdin is closed is killed.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Ignoring error while closing write side: {}", e);
        }
        drop(self.writer);

        if let Some(child) = self.child.take() {
            reap(child).await?;
        }
        Ok(())
    }
}

/// Wait briefly for a helper process to exit, then kill it
pub async fn reap(mut child: Child) -> Result<()> {
    match tokio::time::timeout(HELPER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("Helper process exited with {}", status);
        }
        Ok(Err(e)) => {
            return Err(ConnectionError::Io {
                reason: e.to_string(),
            }
            .into())
        }
        Err(_) => {
            tracing::warn!("Helper process did not exit, killing it");
            child.kill().await.map_err(|e| ConnectionError::Io {
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::tcp("localhost", 9999).to_string(), "tcp://localhost:9999");
        assert_eq!(
            Endpoint::process(["grbl-sim", "-n"]).to_string(),
            "process `grbl-sim -n`"
        );
    }

    #[tokio::test]
    async fn test_empty_process_argv_fails() {
        let endpoint = Endpoint::process(Vec::<String>::new());
        let err = endpoint.connect().await.unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_refused_tcp_connection_fails() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Endpoint::tcp("127.0.0.1", port).connect().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open tcp://127.0.0.1"));
    }
}
