//! Group registry — named broadcast domains and their member sets.
//!
//! A group exists exactly as long as it has members; empty groups are
//! pruned. Membership is the single source of truth for both directions
//! of the invariant "peer is in group's member set iff group is in the
//! peer's group set" — the per-peer view is derived, never stored twice.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::NodeUuid;

/// Maps group names to their current member sets.
///
/// Pure bookkeeping: joins and leaves are commutative and idempotent
/// per peer, and report whether anything actually changed so the caller
/// knows when to emit JOIN/LEAVE events.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<String, BTreeSet<NodeUuid>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to a group. Returns `true` if it was newly added —
    /// a repeat join is a no-op, not an error.
    pub fn join(&mut self, group: &str, uuid: NodeUuid) -> bool {
        self.groups.entry(group.to_string()).or_default().insert(uuid)
    }

    /// Remove a peer from a group. Returns `true` if it was a member —
    /// leaving a group never joined is a no-op, not an error. The group
    /// entry is pruned when its last member leaves.
    pub fn leave(&mut self, group: &str, uuid: &NodeUuid) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(uuid);
        if members.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Current members of a group, for shout fan-out. Empty if the group
    /// does not exist.
    pub fn members(&self, group: &str) -> Vec<NodeUuid> {
        self.groups
            .get(group)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, group: &str, uuid: &NodeUuid) -> bool {
        self.groups.get(group).is_some_and(|m| m.contains(uuid))
    }

    /// All groups a peer currently belongs to (the derived per-peer view).
    pub fn groups_of(&self, uuid: &NodeUuid) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, members)| members.contains(uuid))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop a peer from every group it belongs to; returns the group
    /// names it left, in order, for the implicit LEAVE events after EXIT.
    pub fn remove_peer(&mut self, uuid: &NodeUuid) -> Vec<String> {
        let left = self.groups_of(uuid);
        for group in &left {
            self.leave(group, uuid);
        }
        left
    }

    /// Names of all currently non-empty groups.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
