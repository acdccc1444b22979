//! Relay listen addresses
//!
//! `tcp://host:port` everywhere, `unix:///path/to/socket` on Unix.
//! A Unix listener owns its socket file: a stale socket left by an earlier
//! run is replaced on bind, and the file is removed when the listener drops.

use crate::communication::{BoxedReader, BoxedWriter};
use gcodelink_core::{ConnectionError, Result};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::net::TcpListener;

#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::net::UnixListener;

/// Peer label used for connections that have no printable address
pub const ANONYMOUS_PEER: &str = "remote";

/// Where the relay accepts downstream clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    /// TCP listener on `host:port`
    Tcp { host: String, port: u16 },
    /// Unix domain socket at a filesystem path
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Default for ListenAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".to_string(),
            port: 9999,
        }
    }
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for ListenAddress {
    type Err = ConnectionError;

    fn from_str(spec: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ConnectionError::InvalidAddress {
            address: spec.to_string(),
        };

        if let Some(rest) = spec.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(invalid());
            }
            let port = port.parse::<u16>().map_err(|_| invalid())?;
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }

        #[cfg(unix)]
        if let Some(path) = spec.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        Err(invalid())
    }
}

impl ListenAddress {
    /// Start listening
    pub async fn bind(&self) -> Result<Listener> {
        let bind_error = |e: std::io::Error| ConnectionError::FailedToOpen {
            endpoint: self.to_string(),
            reason: e.to_string(),
        };

        match self {
            Self::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .map_err(bind_error)?;
                Ok(Listener::Tcp(listener))
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                remove_stale_socket(path).map_err(bind_error)?;
                let listener = UnixListener::bind(path).map_err(bind_error)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }
}

/// Remove a leftover socket file; anything else at `path` is left alone
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A bound relay listener
#[derive(Debug)]
pub enum Listener {
    /// TCP
    Tcp(TcpListener),
    /// Unix domain socket and the file it is bound to
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Self::Unix { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                tracing::debug!("Could not remove socket {}: {}", path.display(), e);
            }
        }
    }
}

/// Accepted downstream connection, split into halves
pub struct Accepted {
    /// Printable peer label
    pub peer: String,
    /// Bytes from the client
    pub reader: BoxedReader,
    /// Bytes to the client
    pub writer: BoxedWriter,
}

impl Listener {
    /// Accept one pending connection
    pub async fn accept(&self) -> std::io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Accepted {
                    peer: addr.to_string(),
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                })
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                let (reader, writer) = stream.into_split();
                Ok(Accepted {
                    peer: ANONYMOUS_PEER.to_string(),
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                })
            }
        }
    }

    /// Bound TCP address, e.g. to learn the port picked for `:0`
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        let addr: ListenAddress = "tcp://localhost:9999".parse().unwrap();
        assert_eq!(addr, ListenAddress::default());
        assert_eq!(addr.to_string(), "tcp://localhost:9999");

        let addr: ListenAddress = "tcp://[::1]:7000".parse().unwrap();
        assert_eq!(
            addr,
            ListenAddress::Tcp {
                host: "::1".to_string(),
                port: 7000
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        for spec in ["localhost:9999", "tcp://localhost", "tcp://:80", "tcp://host:http", "udp://x:1"] {
            assert!(spec.parse::<ListenAddress>().is_err(), "{}", spec);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix() {
        let addr: ListenAddress = "unix:///tmp/gcode.sock".parse().unwrap();
        assert_eq!(addr, ListenAddress::Unix(PathBuf::from("/tmp/gcode.sock")));
        assert_eq!(addr.to_string(), "unix:///tmp/gcode.sock");
        assert!("unix://".parse::<ListenAddress>().is_err());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = "tcp://127.0.0.1:0"
            .parse::<ListenAddress>()
            .unwrap()
            .bind()
            .await
            .unwrap();
        assert_ne!(listener.tcp_addr().unwrap().port(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_is_removed_and_rebindable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.sock");
        let addr = ListenAddress::Unix(path.clone());

        let listener = addr.bind().await.unwrap();
        assert!(path.exists());
        drop(listener);
        assert!(!path.exists());

        // A socket left behind by a killed run does not block the next bind.
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());
        let listener = addr.bind().await.unwrap();
        drop(listener);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_bind_leaves_regular_files_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "keep").unwrap();

        let err = ListenAddress::Unix(path.clone()).bind().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep");
    }
}
