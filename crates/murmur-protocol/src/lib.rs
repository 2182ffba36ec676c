//! murmur protocol engine.
//!
//! A peer-to-peer group messaging node: peers discover each other over UDP
//! beacons and/or a gossip rendezvous, track each other's liveness, join
//! named groups, and exchange direct ("whisper") and group-broadcast
//! ("shout") messages over reliable per-peer channels provided by
//! `murmur-transport`.
//!
//! The embedding application sees one [`Node`] with a synchronous API and a
//! single FIFO event stream: `ENTER`, `JOIN`, `LEAVE`, `EXIT`, `WHISPER`,
//! `SHOUT`. Wire format on the reliable channels is MessagePack.

pub mod error;
pub mod event;
pub mod gossip;
pub mod group;
pub mod mailbox;
pub mod node;
pub mod peer;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod wire;

pub use error::MurmurError;
pub use event::{Event, EventKind};
pub use gossip::{GossipDirectory, GossipMessage, PeerRecord};
pub use group::GroupRegistry;
pub use mailbox::{mailbox, MailboxReceiver, MailboxSender};
pub use node::Node;
pub use peer::{Peer, PeerState};
pub use registry::{PeerRegistry, RegistryAction};
pub use runtime::NodeConfig;
pub use types::{now_ms, NodeUuid};
pub use wire::WireMessage;
