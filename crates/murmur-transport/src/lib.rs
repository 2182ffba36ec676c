//! murmur transport layer.
//!
//! The socket substrate for the murmur messaging engine:
//!
//! - [`beacon`] — UDP broadcast discovery: short fixed-format datagrams
//!   announcing a node's identity and mailbox port.
//! - [`channel`] — reliable, ordered, length-delimited TCP frame channels,
//!   one per peer, funneled into a single inbound queue.
//!
//! No protocol semantics live here; frames are opaque bytes. The protocol
//! layer (`murmur-protocol`) decides what the bytes mean.

pub mod beacon;
pub mod channel;
pub mod error;
pub mod types;

pub use beacon::{BeaconFrame, BeaconSocket, BEACON_SIGNATURE, BEACON_VERSION, DEFAULT_BEACON_PORT};
pub use channel::{connect, ChannelManager, ConnId, FrameListener, FrameSender, Inbound};
pub use error::MurmurTransportError;
pub use types::NodeUuid;
