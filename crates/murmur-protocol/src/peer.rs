use std::collections::HashMap;

use crate::types::NodeUuid;

/// Lifecycle of a remote peer as seen by this node.
///
/// `Connecting → Connected → (Expired | Left)`. ENTER fires exactly once,
/// on the Connecting→Connected transition (when the peer's Hello arrives);
/// EXIT fires on the transition to either terminal state, after which the
/// peer is forgotten entirely — a returning peer starts over as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Seen (beacon, gossip, or inbound connection) but no Hello yet.
    Connecting,
    /// Handshake complete; messages flow.
    Connected,
    /// Liveness deadline elapsed without renewal.
    Expired,
    /// Announced its own departure.
    Left,
}

/// Everything this node knows about one remote peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub uuid: NodeUuid,
    /// Last-known mailbox endpoint (`host:port`). Most recent write wins.
    pub endpoint: String,
    pub state: PeerState,
    /// Display name from the peer's Hello; short uuid until then.
    pub name: String,
    /// Header metadata advertised in the peer's Hello.
    pub headers: HashMap<String, String>,
    /// The peer's membership version, mirrored from its wire messages.
    pub status: u8,
    /// Last time any traffic or beacon was seen from this peer (Unix ms).
    pub last_heard: u64,
    /// A liveness ping was already sent for the current silent period.
    pub pinged: bool,
    /// An outbound channel to this peer is currently open.
    pub channel_up: bool,
    /// An outbound connect attempt is in flight.
    pub connect_pending: bool,
}

impl Peer {
    pub fn new(uuid: NodeUuid, endpoint: String, now: u64) -> Self {
        Self {
            uuid,
            endpoint,
            state: PeerState::Connecting,
            name: uuid.short(),
            headers: HashMap::new(),
            status: 0,
            last_heard: now,
            pinged: false,
            channel_up: false,
            connect_pending: false,
        }
    }

    /// Renew the liveness deadline.
    pub fn refresh(&mut self, now: u64) {
        self.last_heard = now;
        self.pinged = false;
    }
}
