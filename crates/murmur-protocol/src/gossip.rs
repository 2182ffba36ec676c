//! Gossip directory — rendezvous-based discovery for routed networks.
//!
//! When UDP broadcast cannot reach peers, a node binds as a rendezvous
//! point and others connect to it over a reliable channel. Everyone
//! periodically publishes peer-address records; the rendezvous point
//! relays its whole store to every client. Records learned here are
//! injected into the peer registry exactly as if observed by beacon, so
//! both discovery paths may run at once — the registry de-duplicates by
//! uuid and the most recent address wins.
//!
//! Pure state machine: the runtime loop owns the sockets.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::MurmurError;
use crate::types::NodeUuid;

/// One peer-address record exchanged over gossip.
///
/// An empty `endpoint` is a tombstone: the peer announced departure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub uuid: NodeUuid,
    pub endpoint: String,
    pub name: String,
}

impl PeerRecord {
    pub fn is_tombstone(&self) -> bool {
        self.endpoint.is_empty()
    }
}

/// Messages on a gossip connection. MessagePack on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Share what the sender knows (a client: itself; the rendezvous
    /// point: its whole store).
    Publish { records: Vec<PeerRecord> },
}

impl GossipMessage {
    pub fn to_bytes(&self) -> Result<Bytes, MurmurError> {
        Ok(Bytes::from(rmp_serde::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MurmurError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// The outcome of applying one inbound Publish.
#[derive(Debug, Default, PartialEq)]
pub struct GossipUpdate {
    /// Live records to feed into the peer registry.
    pub observed: Vec<PeerRecord>,
    /// Peers that published a tombstone and should be dropped.
    pub departed: Vec<NodeUuid>,
}

#[derive(Debug)]
struct StoredRecord {
    record: PeerRecord,
    refreshed_at: u64,
}

/// The record store one node keeps for gossip exchange.
#[derive(Debug)]
pub struct GossipDirectory {
    local: PeerRecord,
    store: HashMap<NodeUuid, StoredRecord>,
}

impl GossipDirectory {
    pub fn new(local: PeerRecord) -> Self {
        Self {
            local,
            store: HashMap::new(),
        }
    }

    /// The record this node publishes about itself.
    pub fn local(&self) -> &PeerRecord {
        &self.local
    }

    /// The departure record published at stop.
    pub fn tombstone(&self) -> PeerRecord {
        PeerRecord {
            uuid: self.local.uuid,
            endpoint: String::new(),
            name: self.local.name.clone(),
        }
    }

    /// Apply an inbound Publish: store every record (most recent write
    /// wins, tombstones included so they keep relaying) and report what
    /// the registry should do. Our own record is ignored.
    pub fn handle_publish(&mut self, records: Vec<PeerRecord>, now: u64) -> GossipUpdate {
        let mut update = GossipUpdate::default();
        for record in records {
            if record.uuid == self.local.uuid {
                continue;
            }
            if record.is_tombstone() {
                update.departed.push(record.uuid);
            } else {
                update.observed.push(record.clone());
            }
            self.store.insert(
                record.uuid,
                StoredRecord {
                    record,
                    refreshed_at: now,
                },
            );
        }
        update
    }

    /// Everything a rendezvous point relays: our record plus the store.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records = vec![self.local.clone()];
        records.extend(self.store.values().map(|s| s.record.clone()));
        records
    }

    /// Drop records that have not been republished within `ttl_ms`.
    /// Returns how many were pruned.
    pub fn prune(&mut self, now: u64, ttl_ms: u64) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, s| now.saturating_sub(s.refreshed_at) < ttl_ms);
        before - self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
