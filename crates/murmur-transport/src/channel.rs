//! Reliable per-peer frame channels.
//!
//! TCP with length-delimited framing. Each node runs one [`FrameListener`]
//! (its mailbox) and opens one outbound connection per peer it talks to.
//! Every connection — accepted or dialed — funnels its inbound frames into
//! a single `mpsc` queue tagged with a connection id, so the engine's event
//! loop multiplexes all peer traffic through one `recv()` point.
//!
//! Sends never block the caller: a bounded per-connection buffer provides
//! transport-level backpressure, and a full buffer surfaces as a send error
//! rather than a stall.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::MurmurTransportError;
use crate::types::NodeUuid;

/// Process-unique identifier for one TCP connection.
pub type ConnId = u64;

/// Per-connection outbound buffer, in frames.
const SEND_BUFFER: usize = 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a connection delivers into the shared inbound funnel.
#[derive(Debug)]
pub enum Inbound {
    /// A new inbound connection was accepted. `sender` writes back to it.
    Opened {
        conn: ConnId,
        addr: SocketAddr,
        sender: FrameSender,
    },
    /// One complete frame arrived.
    Frame { conn: ConnId, bytes: Bytes },
    /// The connection closed or failed.
    Closed { conn: ConnId },
}

/// Write half of a connection. Cheap to clone; sends are non-blocking and
/// bounded by [`SEND_BUFFER`].
#[derive(Debug, Clone)]
pub struct FrameSender {
    conn: ConnId,
    tx: mpsc::Sender<Bytes>,
    max_frame: usize,
}

impl FrameSender {
    /// Queue one frame for writing.
    ///
    /// Fails with [`MurmurTransportError::FrameTooLarge`] if the frame
    /// exceeds the codec limit (it would only poison the write task),
    /// [`MurmurTransportError::Shutdown`] if the connection is gone and
    /// [`MurmurTransportError::Send`] if the buffer is full.
    pub fn send(&self, frame: Bytes) -> Result<(), MurmurTransportError> {
        if frame.len() > self.max_frame {
            return Err(MurmurTransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame,
            });
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MurmurTransportError::Send("send buffer full".into())
            }
            mpsc::error::TrySendError::Closed(_) => MurmurTransportError::Shutdown,
        })
    }

    /// The connection this sender writes to.
    pub fn conn_id(&self) -> ConnId {
        self.conn
    }
}

/// Spawn the read/write tasks for one established stream.
///
/// Returns the sender for the write half. The read half forwards frames
/// into `inbound` and reports `Closed` when the stream ends.
fn spawn_io(
    stream: TcpStream,
    conn: ConnId,
    max_frame: usize,
    inbound: mpsc::Sender<Inbound>,
) -> FrameSender {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let codec = || {
        LengthDelimitedCodec::builder()
            .max_frame_length(max_frame)
            .new_codec()
    };

    let (tx, mut rx) = mpsc::channel::<Bytes>(SEND_BUFFER);

    // Writer: drain the buffer until the peer or the sender goes away.
    let mut sink = FramedWrite::new(write_half, codec());
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                tracing::debug!(conn, "channel write failed: {e}");
                break;
            }
        }
    });

    // Reader: forward frames, then report closure.
    let mut source = FramedRead::new(read_half, codec());
    tokio::spawn(async move {
        while let Some(result) = source.next().await {
            match result {
                Ok(bytes) => {
                    if inbound
                        .send(Inbound::Frame {
                            conn,
                            bytes: bytes.freeze(),
                        })
                        .await
                        .is_err()
                    {
                        return; // engine shut down
                    }
                }
                Err(e) => {
                    tracing::debug!(conn, "channel read failed: {e}");
                    break;
                }
            }
        }
        let _ = inbound.send(Inbound::Closed { conn }).await;
    });

    FrameSender {
        conn,
        tx,
        max_frame,
    }
}

/// Dial a peer's mailbox and wire the connection into `inbound`.
pub async fn connect(
    endpoint: &str,
    max_frame: usize,
    inbound: mpsc::Sender<Inbound>,
) -> Result<FrameSender, MurmurTransportError> {
    let stream =
        TcpStream::connect(endpoint)
            .await
            .map_err(|e| MurmurTransportError::Connect {
                endpoint: endpoint.to_string(),
                source: e.into(),
            })?;
    Ok(spawn_io(stream, next_conn_id(), max_frame, inbound))
}

/// The node's mailbox — accepts peer connections and funnels their frames.
#[derive(Debug)]
pub struct FrameListener {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl FrameListener {
    /// Bind and start accepting. Every accepted connection announces
    /// itself with [`Inbound::Opened`] before any of its frames.
    pub async fn bind(
        addr: SocketAddr,
        max_frame: usize,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<Self, MurmurTransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let conn = next_conn_id();
                        let sender = spawn_io(stream, conn, max_frame, inbound.clone());
                        if inbound
                            .send(Inbound::Opened { conn, addr, sender })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {e}");
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// The bound mailbox address (useful with an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for FrameListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// One live outbound channel per connected peer, keyed by identity.
///
/// Fan-out is a sequence of independent unicast sends: a failure on one
/// channel never affects the others.
#[derive(Debug, Default)]
pub struct ChannelManager {
    channels: HashMap<NodeUuid, FrameSender>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound channel for a peer, replacing any prior one.
    pub fn insert(&mut self, uuid: NodeUuid, sender: FrameSender) {
        self.channels.insert(uuid, sender);
    }

    /// Drop a peer's channel. Returns whether one existed.
    pub fn remove(&mut self, uuid: &NodeUuid) -> bool {
        self.channels.remove(uuid).is_some()
    }

    pub fn contains(&self, uuid: &NodeUuid) -> bool {
        self.channels.contains_key(uuid)
    }

    /// Send one frame to one peer.
    pub fn send_to(&self, uuid: &NodeUuid, frame: Bytes) -> Result<(), MurmurTransportError> {
        match self.channels.get(uuid) {
            Some(sender) => sender.send(frame),
            None => Err(MurmurTransportError::Shutdown),
        }
    }

    /// Send one frame to every listed peer independently.
    /// Returns the peers whose send failed.
    pub fn fan_out<'a>(
        &self,
        targets: impl Iterator<Item = &'a NodeUuid>,
        frame: &Bytes,
    ) -> Vec<NodeUuid> {
        let mut failed = Vec::new();
        for uuid in targets {
            if self.send_to(uuid, frame.clone()).is_err() {
                failed.push(*uuid);
            }
        }
        failed
    }

    /// Identities with a live channel.
    pub fn peers(&self) -> Vec<NodeUuid> {
        self.channels.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
