//! Peer registry — liveness and lifecycle for every known peer.
//!
//! Pure state machine: no I/O. Calls return `Vec<RegistryAction>` that the
//! runtime loop executes (open/close channels, send pings, emit events).
//! All time flows in as explicit Unix-ms arguments, so every transition is
//! testable without clocks.

use std::collections::HashMap;

use crate::event::Event;
use crate::peer::{Peer, PeerState};
use crate::types::{NodeUuid, EVASIVE_MS, EXPIRY_MS};

/// What the runtime loop must do after a registry transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryAction {
    /// Open an outbound channel to this endpoint and send our Hello.
    Connect { uuid: NodeUuid, endpoint: String },
    /// Close the peer's outbound channel.
    Disconnect { uuid: NodeUuid },
    /// Send a liveness probe on the peer's channel.
    Ping { uuid: NodeUuid },
    /// Deliver an event to the application.
    Event(Event),
}

/// Tracks every known peer, drives the per-peer state machine, and decides
/// when peers enter, go evasive, and expire.
#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<NodeUuid, Peer>,
    evasive_ms: u64,
    expiry_ms: u64,
}

impl PeerRegistry {
    /// Create a registry with the default liveness windows.
    pub fn new() -> Self {
        Self::with_timeouts(EVASIVE_MS, EXPIRY_MS)
    }

    /// Create with custom evasive/expiry windows (milliseconds).
    pub fn with_timeouts(evasive_ms: u64, expiry_ms: u64) -> Self {
        Self {
            peers: HashMap::new(),
            evasive_ms,
            expiry_ms,
        }
    }

    // ── Discovery ────────────────────────────────────────────────────────

    /// A peer was observed at `endpoint` (beacon, gossip, or Hello on an
    /// inbound connection). Idempotent: an unseen uuid creates a peer and
    /// asks for a connection; a known one refreshes its deadline and
    /// address (most recent write wins). A known peer whose channel is
    /// down gets a reconnect.
    pub fn observe(&mut self, uuid: NodeUuid, endpoint: &str, now: u64) -> Vec<RegistryAction> {
        match self.peers.get_mut(&uuid) {
            None => {
                let mut peer = Peer::new(uuid, endpoint.to_string(), now);
                peer.connect_pending = true;
                self.peers.insert(uuid, peer);
                vec![RegistryAction::Connect {
                    uuid,
                    endpoint: endpoint.to_string(),
                }]
            }
            Some(peer) => {
                peer.refresh(now);
                if peer.endpoint != endpoint {
                    tracing::debug!(
                        peer = %uuid,
                        old = %peer.endpoint,
                        new = %endpoint,
                        "peer endpoint changed"
                    );
                    peer.endpoint = endpoint.to_string();
                }
                if !peer.channel_up && !peer.connect_pending {
                    peer.connect_pending = true;
                    vec![RegistryAction::Connect {
                        uuid,
                        endpoint: peer.endpoint.clone(),
                    }]
                } else {
                    vec![]
                }
            }
        }
    }

    /// A Hello arrived from `uuid`. Completes the handshake: the first
    /// Hello moves the peer to Connected and emits ENTER; a repeat Hello
    /// just refreshes the stored identity. An unknown sender (inbound
    /// connection before any beacon) is created on the spot and we
    /// connect back to its advertised endpoint.
    pub fn apply_hello(
        &mut self,
        uuid: NodeUuid,
        endpoint: &str,
        name: &str,
        headers: HashMap<String, String>,
        status: u8,
        now: u64,
    ) -> Vec<RegistryAction> {
        let mut actions = Vec::new();

        let peer = self.peers.entry(uuid).or_insert_with(|| {
            let mut p = Peer::new(uuid, endpoint.to_string(), now);
            p.connect_pending = true;
            actions.push(RegistryAction::Connect {
                uuid,
                endpoint: endpoint.to_string(),
            });
            p
        });

        peer.refresh(now);
        peer.endpoint = endpoint.to_string();
        peer.name = name.to_string();
        peer.headers = headers;
        peer.status = status;

        if peer.state == PeerState::Connecting {
            peer.state = PeerState::Connected;
            actions.push(RegistryAction::Event(Event::Enter {
                uuid,
                name: peer.name.clone(),
                endpoint: peer.endpoint.clone(),
                headers: peer.headers.clone(),
            }));
        }

        actions
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Any traffic from a peer renews its liveness deadline.
    pub fn refresh(&mut self, uuid: &NodeUuid, now: u64) {
        if let Some(peer) = self.peers.get_mut(uuid) {
            peer.refresh(now);
        }
    }

    /// Run on a fixed tick. Silent peers are pinged once after the evasive
    /// window and expired after the expiry window — expiry closes the
    /// channel and emits EXIT (the loop adds the implicit LEAVEs).
    pub fn expire_sweep(&mut self, now: u64) -> Vec<RegistryAction> {
        let mut actions = Vec::new();
        let mut expired = Vec::new();

        for peer in self.peers.values_mut() {
            let elapsed = now.saturating_sub(peer.last_heard);
            if elapsed >= self.expiry_ms {
                expired.push((peer.uuid, peer.state == PeerState::Connected));
                peer.state = PeerState::Expired;
            } else if elapsed >= self.evasive_ms && !peer.pinged {
                peer.pinged = true;
                if peer.channel_up {
                    actions.push(RegistryAction::Ping { uuid: peer.uuid });
                }
            }
        }

        for (uuid, entered) in expired {
            actions.extend(self.drop_peer(&uuid, entered));
        }
        actions
    }

    /// Explicit departure (Goodbye message or departure beacon): same
    /// effect as expiry, emitted immediately.
    pub fn remove(&mut self, uuid: &NodeUuid) -> Vec<RegistryAction> {
        if let Some(peer) = self.peers.get_mut(uuid) {
            let entered = peer.state == PeerState::Connected;
            peer.state = PeerState::Left;
            self.drop_peer(uuid, entered)
        } else {
            vec![]
        }
    }

    /// `entered` is whether the peer reached Connected before its state
    /// was moved to a terminal one, captured by the caller.
    fn drop_peer(&mut self, uuid: &NodeUuid, entered: bool) -> Vec<RegistryAction> {
        let Some(peer) = self.peers.remove(uuid) else {
            return vec![];
        };
        let mut actions = vec![RegistryAction::Disconnect { uuid: *uuid }];
        // EXIT only if the application ever saw this peer ENTER.
        if entered {
            actions.push(RegistryAction::Event(Event::Exit {
                uuid: *uuid,
                name: peer.name,
            }));
        }
        actions
    }

    // ── Channel bookkeeping ──────────────────────────────────────────────

    /// The loop reports outbound channel state changes here.
    pub fn channel_up(&mut self, uuid: &NodeUuid, up: bool) {
        if let Some(peer) = self.peers.get_mut(uuid) {
            peer.channel_up = up;
            if up {
                peer.connect_pending = false;
            }
        }
    }

    /// A connect attempt failed; a later observation may retry.
    pub fn connect_failed(&mut self, uuid: &NodeUuid) {
        if let Some(peer) = self.peers.get_mut(uuid) {
            peer.connect_pending = false;
        }
    }

    /// Check a membership version from a Join/Leave against the expected
    /// increment; store the new value either way. A mismatch means we
    /// missed an update somewhere.
    pub fn check_status(&mut self, uuid: &NodeUuid, wire_status: u8) -> bool {
        match self.peers.get_mut(uuid) {
            Some(peer) => {
                let expected = peer.status.wrapping_add(1);
                peer.status = wire_status;
                wire_status == expected
            }
            None => false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn contains(&self, uuid: &NodeUuid) -> bool {
        self.peers.contains_key(uuid)
    }

    pub fn is_connected(&self, uuid: &NodeUuid) -> bool {
        self.peers
            .get(uuid)
            .is_some_and(|p| p.state == PeerState::Connected)
    }

    /// Display name — short uuid until the peer's Hello arrives.
    pub fn name_of(&self, uuid: &NodeUuid) -> String {
        self.peers
            .get(uuid)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| uuid.short())
    }

    pub fn endpoint_of(&self, uuid: &NodeUuid) -> Option<&str> {
        self.peers.get(uuid).map(|p| p.endpoint.as_str())
    }

    pub fn header(&self, uuid: &NodeUuid, key: &str) -> Option<&str> {
        self.peers
            .get(uuid)
            .and_then(|p| p.headers.get(key))
            .map(String::as_str)
    }

    /// Uuids of all currently connected peers.
    pub fn connected_peers(&self) -> Vec<NodeUuid> {
        self.peers
            .values()
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| p.uuid)
            .collect()
    }

    pub fn get(&self, uuid: &NodeUuid) -> Option<&Peer> {
        self.peers.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn uuid(_seed: u8) -> NodeUuid {
        NodeUuid::new_random()
    }

    fn events(actions: &[RegistryAction]) -> Vec<&Event> {
        actions
            .iter()
            .filter_map(|a| match a {
                RegistryAction::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn registry() -> PeerRegistry {
        PeerRegistry::with_timeouts(100, 300)
    }

    #[test]
    fn observe_unknown_creates_and_connects() {
        let mut reg = registry();
        let alice = uuid(1);

        let actions = reg.observe(alice, "10.0.0.2:49152", 1_000);
        assert_eq!(
            actions,
            vec![RegistryAction::Connect {
                uuid: alice,
                endpoint: "10.0.0.2:49152".into()
            }]
        );
        assert!(reg.contains(&alice));
        assert!(!reg.is_connected(&alice));
    }

    #[test]
    fn observe_known_is_idempotent_and_refreshes() {
        let mut reg = registry();
        let alice = uuid(1);

        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.channel_up(&alice, true);

        let actions = reg.observe(alice, "10.0.0.2:49152", 1_200);
        assert!(actions.is_empty());
        assert_eq!(reg.get(&alice).map(|p| p.last_heard), Some(1_200));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn observe_most_recent_endpoint_wins() {
        let mut reg = registry();
        let alice = uuid(1);

        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.channel_up(&alice, true);
        reg.observe(alice, "10.0.0.9:50000", 1_100);

        assert_eq!(reg.endpoint_of(&alice), Some("10.0.0.9:50000"));
    }

    #[test]
    fn observe_reconnects_when_channel_down() {
        let mut reg = registry();
        let alice = uuid(1);

        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.channel_up(&alice, true);
        // Channel dies (read task reported Closed).
        reg.channel_up(&alice, false);

        let actions = reg.observe(alice, "10.0.0.2:49152", 2_000);
        assert_eq!(
            actions,
            vec![RegistryAction::Connect {
                uuid: alice,
                endpoint: "10.0.0.2:49152".into()
            }]
        );
    }

    #[test]
    fn no_duplicate_connect_while_pending() {
        let mut reg = registry();
        let alice = uuid(1);

        let first = reg.observe(alice, "10.0.0.2:49152", 1_000);
        assert_eq!(first.len(), 1);
        // Beacon arrives again before the connect resolves.
        let second = reg.observe(alice, "10.0.0.2:49152", 1_050);
        assert!(second.is_empty());
        // Failed connect clears the pending flag; next observation retries.
        reg.connect_failed(&alice);
        let third = reg.observe(alice, "10.0.0.2:49152", 1_100);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn hello_completes_handshake_with_enter() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);

        let mut headers = HashMap::new();
        headers.insert("app".into(), "demo".into());
        let actions = reg.apply_hello(alice, "10.0.0.2:49152", "alice", headers.clone(), 0, 1_100);

        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        match evs[0] {
            Event::Enter {
                uuid: u,
                name,
                endpoint,
                headers: h,
            } => {
                assert_eq!(*u, alice);
                assert_eq!(name, "alice");
                assert_eq!(endpoint, "10.0.0.2:49152");
                assert_eq!(h, &headers);
            }
            other => panic!("expected Enter, got {other:?}"),
        }
        assert!(reg.is_connected(&alice));
        assert_eq!(reg.name_of(&alice), "alice");
        assert_eq!(reg.header(&alice, "app"), Some("demo"));
    }

    #[test]
    fn duplicate_hello_emits_no_second_enter() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_100);

        let actions = reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_200);
        assert!(events(&actions).is_empty());
    }

    #[test]
    fn hello_from_unknown_peer_connects_back() {
        let mut reg = registry();
        let bob = uuid(2);

        // Inbound connection handshake before we ever saw a beacon.
        let actions = reg.apply_hello(bob, "10.0.0.7:49999", "bob", HashMap::new(), 0, 1_000);

        assert!(actions.iter().any(|a| matches!(
            a,
            RegistryAction::Connect { uuid, endpoint } if *uuid == bob && endpoint == "10.0.0.7:49999"
        )));
        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        assert!(matches!(evs[0], Event::Enter { .. }));
    }

    #[test]
    fn sweep_pings_evasive_peer_once() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_000);
        reg.channel_up(&alice, true);

        // Past evasive, before expiry: exactly one ping.
        let actions = reg.expire_sweep(1_150);
        assert_eq!(actions, vec![RegistryAction::Ping { uuid: alice }]);
        let again = reg.expire_sweep(1_200);
        assert!(again.is_empty());

        // Traffic clears the flag; silence pings again later.
        reg.refresh(&alice, 1_250);
        let after_refresh = reg.expire_sweep(1_400);
        assert_eq!(after_refresh, vec![RegistryAction::Ping { uuid: alice }]);
    }

    #[test]
    fn sweep_expires_silent_peer_with_exit() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_000);
        reg.channel_up(&alice, true);

        let actions = reg.expire_sweep(1_300);
        assert!(actions.contains(&RegistryAction::Disconnect { uuid: alice }));
        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].kind(), EventKind::Exit);
        assert_eq!(evs[0].peer_name(), "alice");

        assert!(!reg.contains(&alice));
        // A second sweep finds nothing — EXIT exactly once.
        assert!(reg.expire_sweep(2_000).is_empty());
    }

    #[test]
    fn expiry_of_never_connected_peer_emits_no_exit() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);

        // No Hello ever arrived — the application never saw ENTER.
        let actions = reg.expire_sweep(1_300);
        assert!(actions.contains(&RegistryAction::Disconnect { uuid: alice }));
        assert!(events(&actions).is_empty());
        assert!(!reg.contains(&alice));
    }

    #[test]
    fn remove_is_immediate_exit() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_000);

        let actions = reg.remove(&alice);
        let evs = events(&actions);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].kind(), EventKind::Exit);
        assert!(!reg.contains(&alice));

        // Removing again is a no-op.
        assert!(reg.remove(&alice).is_empty());
    }

    #[test]
    fn remove_before_handshake_emits_no_exit() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);

        // Departure beacon lands before the Hello: drop the dial silently.
        let actions = reg.remove(&alice);
        assert!(actions.contains(&RegistryAction::Disconnect { uuid: alice }));
        assert!(events(&actions).is_empty());
        assert!(!reg.contains(&alice));
    }

    #[test]
    fn refresh_postpones_expiry() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_000);

        reg.refresh(&alice, 1_250);
        assert!(reg.expire_sweep(1_300).iter().all(|a| !matches!(
            a,
            RegistryAction::Event(Event::Exit { .. })
        )));
        assert!(reg.contains(&alice));
    }

    #[test]
    fn status_check_detects_missed_updates() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 5, 1_000);

        assert!(reg.check_status(&alice, 6));
        // Skipped 7 — mismatch, but the new value is stored.
        assert!(!reg.check_status(&alice, 8));
        assert!(reg.check_status(&alice, 9));
    }

    #[test]
    fn status_wraps_around() {
        let mut reg = registry();
        let alice = uuid(1);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 255, 1_000);
        assert!(reg.check_status(&alice, 0));
    }

    #[test]
    fn connected_peers_lists_only_connected() {
        let mut reg = registry();
        let alice = uuid(1);
        let bob = uuid(2);
        reg.observe(alice, "10.0.0.2:49152", 1_000);
        reg.observe(bob, "10.0.0.3:49153", 1_000);
        reg.apply_hello(alice, "10.0.0.2:49152", "alice", HashMap::new(), 0, 1_000);

        let connected = reg.connected_peers();
        assert_eq!(connected, vec![alice]);
        assert_eq!(reg.len(), 2);
    }
}
