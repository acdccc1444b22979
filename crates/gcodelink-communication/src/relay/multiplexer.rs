//! Relay Multiplexer
//!
//! Shares one upstream duplex connection between any number of downstream
//! clients. Every upstream read is broadcast, as one chunk, to every client
//! connected at that moment; every client read is forwarded to the upstream.
//!
//! Each client gets a reader task and a writer task. They talk to a single
//! dispatch loop over channels, and only that loop adds or removes clients.
//! The loop never waits on a client socket: chunks are queued with
//! `try_send`, a client whose queue is full is dropped, and a departing
//! client's writer drains its backlog in the background under a deadline.

use super::listen_addr::{Accepted, ListenAddress, Listener};
use crate::communication::{reap, BoxedReader, BoxedWriter, DuplexLink};
use gcodelink_core::{ConnectionError, Result, SharedSink, TrafficEvent};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Largest single read from any connection
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Idle interval after which the dispatch loop reports it is still waiting
///
/// Only drives a trace-level "relay idle" record; relaying never waits on it.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Upstream chunks queued per client before it counts as not reading
pub const DEFAULT_CLIENT_QUEUE: usize = 256;

/// How long a departing client's writer may take to flush its backlog
const CLIENT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a relay run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The upstream closed its side
    UpstreamClosed,
    /// The shutdown future completed
    Interrupted,
}

/// Message from a client task to the dispatch loop
#[derive(Debug)]
enum ClientEvent {
    Data { id: Uuid, data: Vec<u8> },
    Closed { id: Uuid },
}

/// Dispatch-loop view of one downstream client
struct Client {
    peer: String,
    chunks: mpsc::Sender<Arc<[u8]>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Client {
    /// Stop reading and let the writer flush what is queued, then close the socket
    ///
    /// The flush runs in its own task, aborted after [`CLIENT_DRAIN_GRACE`];
    /// the returned handle completes when the socket is gone.
    fn close(self) -> JoinHandle<()> {
        self.reader.abort();
        drop(self.chunks);

        let peer = self.peer;
        let writer = self.writer;
        let abort = writer.abort_handle();
        tokio::spawn(async move {
            match tokio::time::timeout(CLIENT_DRAIN_GRACE, writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(peer = %peer, "Client writer ended abnormally: {}", e),
                Err(_) => {
                    tracing::warn!(peer = %peer, "Client did not take its backlog, dropping it");
                    abort.abort();
                }
            }
        })
    }

    /// Drop the connection without flushing
    fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// One upstream, many downstream clients
pub struct RelayMultiplexer {
    listener: Listener,
    upstream: DuplexLink,
    sink: SharedSink,
    chunk_size: usize,
    client_queue: usize,
    poll_timeout: Duration,
}

impl RelayMultiplexer {
    /// Bind `listen` and relay to `upstream`
    pub async fn bind(listen: &ListenAddress, upstream: DuplexLink, sink: SharedSink) -> Result<Self> {
        let listener = listen.bind().await?;
        tracing::info!("Relay listening on {}", listen);
        Ok(Self::new(listener, upstream, sink))
    }

    /// Relay over an already bound listener
    pub fn new(listener: Listener, upstream: DuplexLink, sink: SharedSink) -> Self {
        Self {
            listener,
            upstream,
            sink,
            chunk_size: DEFAULT_CHUNK_SIZE,
            client_queue: DEFAULT_CLIENT_QUEUE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Set the largest single read
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set how many upstream chunks may wait for one client
    pub fn with_client_queue(mut self, client_queue: usize) -> Self {
        self.client_queue = client_queue.max(1);
        self
    }

    /// Set the interval of the trace-level idle record
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// TCP address clients connect to, if listening on TCP
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.tcp_addr()
    }

    /// Relay until the upstream closes or `shutdown` completes
    ///
    /// Every downstream connection is closed and the upstream released on
    /// return, whatever the outcome.
    pub async fn run<F>(self, shutdown: F) -> Result<RelayOutcome>
    where
        F: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            upstream,
            sink,
            chunk_size,
            client_queue,
            poll_timeout,
        } = self;

        let (mut up_reader, mut up_writer, helper) = upstream.into_parts();
        let (events_tx, mut events_rx) = mpsc::channel(client_queue);
        let mut clients: HashMap<Uuid, Client> = HashMap::new();
        let mut buf = vec![0u8; chunk_size];
        tokio::pin!(shutdown);

        let outcome: Result<RelayOutcome> = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Bye");
                    break Ok(RelayOutcome::Interrupted);
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        let (id, client) =
                            spawn_client(accepted, chunk_size, client_queue, events_tx.clone());
                        sink.record(TrafficEvent::ClientConnected { peer: client.peer.clone() });
                        clients.insert(id, client);
                    }
                    Err(e) => tracing::warn!("Failed to accept client: {}", e),
                },
                read = up_reader.read(&mut buf) => match read {
                    Ok(0) => {
                        sink.record(TrafficEvent::UpstreamClosed);
                        break Ok(RelayOutcome::UpstreamClosed);
                    }
                    Ok(n) => {
                        let chunk: Arc<[u8]> = Arc::from(&buf[..n]);
                        sink.record(TrafficEvent::RelayUpstream(chunk.to_vec()));
                        let mut stalled = Vec::new();
                        for (id, client) in &clients {
                            match client.chunks.try_send(Arc::clone(&chunk)) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => stalled.push(*id),
                                // The writer gave up; the reader still reports the disconnect.
                                Err(TrySendError::Closed(_)) => {}
                            }
                        }
                        for id in stalled {
                            if let Some(client) = clients.remove(&id) {
                                tracing::warn!(peer = %client.peer, "Client is not reading, dropping it");
                                sink.record(TrafficEvent::ClientDisconnected { peer: client.peer.clone() });
                                client.abort();
                            }
                        }
                    }
                    Err(e) => {
                        break Err(ConnectionError::ConnectionLost {
                            reason: format!("upstream read failed: {}", e),
                        }
                        .into());
                    }
                },
                Some(event) = events_rx.recv() => match event {
                    ClientEvent::Data { id, data } => {
                        let peer = clients
                            .get(&id)
                            .map(|c| c.peer.clone())
                            .unwrap_or_default();
                        let written = forward_upstream(&mut up_writer, &data).await;
                        sink.record(TrafficEvent::RelayDownstream { peer, data });
                        if let Err(e) = written {
                            break Err(e);
                        }
                    }
                    ClientEvent::Closed { id } => {
                        if let Some(client) = clients.remove(&id) {
                            sink.record(TrafficEvent::ClientDisconnected { peer: client.peer.clone() });
                            // Detached: the drain task bounds itself.
                            drop(client.close());
                        }
                    }
                },
                _ = tokio::time::sleep(poll_timeout) => {
                    tracing::trace!(clients = clients.len(), "relay idle");
                }
            }
        };

        let draining: Vec<_> = clients.drain().map(|(_, client)| client.close()).collect();
        for drained in draining {
            let _ = drained.await;
        }

        if let Err(e) = up_writer.shutdown().await {
            tracing::debug!("Ignoring error while closing upstream: {}", e);
        }
        drop(up_writer);
        drop(up_reader);
        if let Some(child) = helper {
            reap(child).await?;
        }

        outcome
    }
}

async fn forward_upstream(writer: &mut BoxedWriter, data: &[u8]) -> Result<()> {
    let lost = |e: std::io::Error| ConnectionError::ConnectionLost {
        reason: format!("upstream write failed: {}", e),
    };
    writer.write_all(data).await.map_err(lost)?;
    writer.flush().await.map_err(lost)?;
    Ok(())
}

fn spawn_client(
    accepted: Accepted,
    chunk_size: usize,
    client_queue: usize,
    events: mpsc::Sender<ClientEvent>,
) -> (Uuid, Client) {
    let id = Uuid::new_v4();
    let (chunks_tx, chunks_rx) = mpsc::channel(client_queue);
    let Accepted {
        peer,
        reader,
        writer,
    } = accepted;

    let reader = tokio::spawn(read_client(id, reader, chunk_size, events));
    let writer = tokio::spawn(write_client(peer.clone(), writer, chunks_rx));

    (
        id,
        Client {
            peer,
            chunks: chunks_tx,
            reader,
            writer,
        },
    )
}

async fn read_client(
    id: Uuid,
    mut reader: BoxedReader,
    chunk_size: usize,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let data = buf[..n].to_vec();
                if events.send(ClientEvent::Data { id, data }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(%id, "Client read failed: {}", e);
                break;
            }
        }
    }
    let _ = events.send(ClientEvent::Closed { id }).await;
}

async fn write_client(
    peer: String,
    mut writer: BoxedWriter,
    mut chunks: mpsc::Receiver<Arc<[u8]>>,
) {
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = writer.write_all(&chunk).await {
            tracing::warn!(peer = %peer, "Failed to write to client: {}", e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(peer = %peer, "Ignoring error while closing client: {}", e);
    }
}
