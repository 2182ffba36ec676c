//! Protocol runtime — the engine behind a [`Node`](crate::Node).
//!
//! One tokio task owns all mutable protocol state (peer registry, group
//! registry, channels, gossip directory) and multiplexes over the beacon
//! socket, peer channels, gossip connections, timers, and the command
//! channel. The application never touches any of it directly: commands go
//! in over an mpsc, events come out through the mailbox.

mod engine;
mod r#loop;

pub(crate) use engine::Engine;
pub(crate) use r#loop::run_loop;

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::MurmurError;
use crate::types::{
    NodeUuid, BEACON_INTERVAL_MS, EVASIVE_MS, EXPIRY_MS, MAX_FRAME_SIZE,
};

/// Configuration for one node. All fields have working defaults; setters
/// on [`Node`](crate::Node) adjust them before `start()`.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// UDP beacon port. Zero disables beaconing (gossip-only discovery).
    pub beacon_port: u16,
    /// Beacon broadcast period and gossip publish period, in ms.
    pub interval_ms: u64,
    /// Bind NIC address. `None` binds all interfaces and advertises the
    /// host's preferred outbound address.
    pub interface: Option<Ipv4Addr>,
    /// Override the advertised mailbox endpoint (`host:port`).
    pub endpoint: Option<String>,
    /// Accept gossip clients on this address (rendezvous point).
    pub gossip_bind: Option<String>,
    /// Connect to a rendezvous point at this address.
    pub gossip_connect: Option<String>,
    /// Enable diagnostic logging (debug-level detail via `tracing`).
    pub verbose: bool,
    /// Silent peers are pinged after this long.
    pub evasive_ms: u64,
    /// Silent peers are expired (EXIT) after this long.
    pub expiry_ms: u64,
    /// Maximum frame size on reliable channels.
    pub max_frame: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            beacon_port: murmur_transport::DEFAULT_BEACON_PORT,
            interval_ms: BEACON_INTERVAL_MS,
            interface: None,
            endpoint: None,
            gossip_bind: None,
            gossip_connect: None,
            verbose: false,
            evasive_ms: EVASIVE_MS,
            expiry_ms: EXPIRY_MS,
            max_frame: MAX_FRAME_SIZE,
        }
    }
}

/// The identity a node carries into its runtime.
#[derive(Debug, Clone)]
pub(crate) struct Identity {
    pub uuid: NodeUuid,
    pub name: String,
    pub headers: HashMap<String, String>,
    /// Groups joined before start; advertised in the first Hello.
    pub groups: Vec<String>,
}

/// Commands the application sends to the runtime loop.
pub(crate) enum Command {
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    Whisper {
        to: NodeUuid,
        frames: Vec<Bytes>,
        reply: oneshot::Sender<Result<(), MurmurError>>,
    },
    Shout {
        group: String,
        frames: Vec<Bytes>,
    },
    SetHeader {
        key: String,
        value: String,
    },
    Peers {
        reply: oneshot::Sender<Vec<NodeUuid>>,
    },
    PeerGroups {
        uuid: NodeUuid,
        reply: oneshot::Sender<Vec<String>>,
    },
    PeerHeader {
        uuid: NodeUuid,
        key: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Dump,
    Stop,
}
