//! The synchronous node facade.
//!
//! A [`Node`] owns a private tokio runtime; `start()` binds the sockets and
//! spawns the protocol loop, and every call after that is a message to that
//! loop. The facade itself holds only identity, configuration, and a mirror
//! of our own group memberships.
//!
//! Calls block briefly on the command channel and must not be made from
//! inside an async context.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
#[cfg(unix)]
use std::os::unix::io::RawFd;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::MurmurError;
use crate::event::Event;
use crate::mailbox::{mailbox, MailboxReceiver};
use crate::runtime::{run_loop, Command, Engine, Identity, NodeConfig};
use crate::types::NodeUuid;

/// Command channel depth between the facade and the loop.
const COMMAND_DEPTH: usize = 64;

/// How long `stop()` waits for the loop to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One peer-to-peer messaging node.
pub struct Node {
    uuid: NodeUuid,
    name: String,
    config: NodeConfig,
    headers: HashMap<String, String>,
    /// Our own memberships; the loop's copy is kept in lockstep.
    groups: BTreeSet<String>,
    running: Option<Running>,
}

struct Running {
    runtime: Runtime,
    commands: mpsc::Sender<Command>,
    events: MailboxReceiver,
    loop_task: JoinHandle<()>,
}

impl Node {
    /// Create a stopped node. An empty name defaults to the first six hex
    /// digits of the node's UUID.
    pub fn new(name: &str) -> Self {
        let uuid = NodeUuid::new_random();
        let name = if name.is_empty() {
            uuid.short()
        } else {
            name.to_string()
        };
        Self {
            uuid,
            name,
            config: NodeConfig::default(),
            headers: HashMap::new(),
            groups: BTreeSet::new(),
            running: None,
        }
    }

    pub fn uuid(&self) -> NodeUuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ── Configuration ────────────────────────────────────────────────────
    //
    // Setters take effect on the next `start()`; they do not reconfigure a
    // running node.

    /// UDP beacon port. Zero disables beaconing entirely.
    pub fn set_beacon_port(&mut self, port: u16) {
        self.config.beacon_port = port;
    }

    /// Beacon broadcast and gossip publish period.
    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.config.interval_ms = interval_ms;
    }

    /// Bind to one NIC instead of all interfaces.
    pub fn set_interface(&mut self, addr: Ipv4Addr) {
        self.config.interface = Some(addr);
    }

    /// Advertise this exact `host:port` instead of the detected address.
    pub fn set_endpoint(&mut self, endpoint: &str) {
        self.config.endpoint = Some(endpoint.to_string());
    }

    /// Act as a gossip rendezvous point on `addr`.
    pub fn gossip_bind(&mut self, addr: &str) {
        self.config.gossip_bind = Some(addr.to_string());
    }

    /// Register with the gossip rendezvous point at `addr`.
    pub fn gossip_connect(&mut self, addr: &str) {
        self.config.gossip_connect = Some(addr.to_string());
    }

    pub fn set_verbose(&mut self) {
        self.config.verbose = true;
    }

    /// Silent peers are pinged after this long.
    pub fn set_evasive_ms(&mut self, evasive_ms: u64) {
        self.config.evasive_ms = evasive_ms;
    }

    /// Silent peers are dropped (EXIT) after this long.
    pub fn set_expiry_ms(&mut self, expiry_ms: u64) {
        self.config.expiry_ms = expiry_ms;
    }

    /// Set a header advertised to peers in the handshake. Peers that have
    /// already seen our Hello will not see the new value.
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_string(), value.to_string());
        if let Some(running) = &self.running {
            let _ = running.commands.blocking_send(Command::SetHeader {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Bind sockets and start the protocol loop. Idempotent.
    pub fn start(&mut self) -> Result<(), MurmurError> {
        if self.running.is_some() {
            return Ok(());
        }
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("murmur-node")
            .enable_all()
            .build()
            .map_err(|e| MurmurError::Runtime(format!("failed to build runtime: {e}")))?;

        let identity = Identity {
            uuid: self.uuid,
            name: self.name.clone(),
            headers: self.headers.clone(),
            groups: self.groups.iter().cloned().collect(),
        };
        let engine = runtime.block_on(Engine::bind(identity, self.config.clone()))?;

        let (commands, command_rx) = mpsc::channel(COMMAND_DEPTH);
        let (event_tx, events) = mailbox()?;
        let loop_task = runtime.spawn(run_loop(engine, command_rx, event_tx));

        self.running = Some(Running {
            runtime,
            commands,
            events,
            loop_task,
        });
        Ok(())
    }

    /// Stop the loop, announce departure, and tear the runtime down.
    /// Idempotent; also called on drop.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.commands.blocking_send(Command::Stop);
        let stopped = running
            .runtime
            .block_on(async { tokio::time::timeout(STOP_TIMEOUT, running.loop_task).await });
        if stopped.is_err() {
            warn!(uuid = %self.uuid, "protocol loop did not stop in time");
        }
        running.runtime.shutdown_timeout(Duration::from_secs(1));
    }

    // ── Groups ───────────────────────────────────────────────────────────

    /// Join a group. Before `start()` the membership is simply recorded and
    /// advertised in the first handshake; on a running node it is announced
    /// to every peer and echoed back as a local JOIN event. Idempotent.
    pub fn join(&mut self, group: &str) {
        if !self.groups.insert(group.to_string()) {
            return;
        }
        if let Some(running) = &self.running {
            let _ = running.commands.blocking_send(Command::Join {
                group: group.to_string(),
            });
        }
    }

    /// Leave a group; the mirror image of [`join`](Self::join).
    pub fn leave(&mut self, group: &str) {
        if !self.groups.remove(group) {
            return;
        }
        if let Some(running) = &self.running {
            let _ = running.commands.blocking_send(Command::Leave {
                group: group.to_string(),
            });
        }
    }

    /// Groups this node currently belongs to.
    pub fn own_groups(&self) -> Vec<String> {
        self.groups.iter().cloned().collect()
    }

    // ── Messaging ────────────────────────────────────────────────────────

    /// Send a multi-frame message to one peer.
    pub fn whisper(&self, to: NodeUuid, frames: Vec<Bytes>) -> Result<(), MurmurError> {
        let running = self.running.as_ref().ok_or(MurmurError::NotRunning)?;
        let (reply, answer) = oneshot::channel();
        running
            .commands
            .blocking_send(Command::Whisper { to, frames, reply })
            .map_err(|_| MurmurError::NotRunning)?;
        answer.blocking_recv().map_err(|_| MurmurError::NotRunning)?
    }

    /// Send one text frame to one peer.
    pub fn whispers(&self, to: NodeUuid, text: &str) -> Result<(), MurmurError> {
        self.whisper(to, vec![Bytes::copy_from_slice(text.as_bytes())])
    }

    /// Broadcast a multi-frame message to every member of `group`. An empty
    /// or unknown group is not an error; the message just reaches nobody.
    pub fn shout(&self, group: &str, frames: Vec<Bytes>) -> Result<(), MurmurError> {
        let running = self.running.as_ref().ok_or(MurmurError::NotRunning)?;
        running
            .commands
            .blocking_send(Command::Shout {
                group: group.to_string(),
                frames,
            })
            .map_err(|_| MurmurError::NotRunning)
    }

    /// Broadcast one text frame to every member of `group`.
    pub fn shouts(&self, group: &str, text: &str) -> Result<(), MurmurError> {
        self.shout(group, vec![Bytes::copy_from_slice(text.as_bytes())])
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Receive the next protocol event.
    ///
    /// `timeout_ms < 0` blocks, `0` polls, `> 0` waits at most that long.
    /// Returns `None` on timeout, on a stopped node, or once the loop has
    /// shut down and the queue is drained.
    pub fn recv(&self, timeout_ms: i64) -> Option<Event> {
        self.running.as_ref()?.events.recv(timeout_ms)
    }

    /// A file descriptor that polls readable whenever an event is queued.
    /// Embed it in an external select/poll loop, then drain with
    /// `recv(0)`.
    #[cfg(unix)]
    pub fn pollable_fd(&self) -> Option<RawFd> {
        Some(self.running.as_ref()?.events.as_raw_fd())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let running = self.running.as_ref()?;
        let (reply, answer) = oneshot::channel();
        running.commands.blocking_send(make(reply)).ok()?;
        answer.blocking_recv().ok()
    }

    /// UUIDs of every fully connected peer.
    pub fn peers(&self) -> Vec<NodeUuid> {
        self.query(|reply| Command::Peers { reply }).unwrap_or_default()
    }

    /// Groups a given peer belongs to, as far as we know.
    pub fn peer_groups(&self, uuid: NodeUuid) -> Vec<String> {
        self.query(|reply| Command::PeerGroups { uuid, reply })
            .unwrap_or_default()
    }

    /// One header value a peer advertised in its handshake.
    pub fn peer_header_value(&self, uuid: NodeUuid, key: &str) -> Option<String> {
        self.query(|reply| Command::PeerHeader {
            uuid,
            key: key.to_string(),
            reply,
        })
        .flatten()
    }

    /// Log the node's state at info level.
    pub fn dump(&self) {
        if let Some(running) = &self.running {
            let _ = running.commands.blocking_send(Command::Dump);
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
