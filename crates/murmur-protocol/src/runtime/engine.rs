//! Engine state and handlers.
//!
//! The engine owns every piece of mutable protocol state and reacts to one
//! input at a time: a beacon, a channel frame, a gossip frame, a timer
//! tick, a command. Handlers are synchronous; anything that blocks (peer
//! dials, gossip redials) is spawned and reports back through the
//! `Internal` channel.

use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmur_transport::{
    connect, BeaconFrame, BeaconSocket, ChannelManager, ConnId, FrameListener, FrameSender,
    Inbound, MurmurTransportError,
};

use crate::error::MurmurError;
use crate::event::Event;
use crate::gossip::{GossipDirectory, GossipMessage, PeerRecord};
use crate::group::GroupRegistry;
use crate::mailbox::MailboxSender;
use crate::registry::{PeerRegistry, RegistryAction};
use crate::types::{now_ms, NodeUuid};
use crate::wire::WireMessage;

use super::{Command, Identity, NodeConfig};

/// How long a dial may take before we give up on this attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Funnel depth for inbound frames and internal task results.
const FUNNEL_DEPTH: usize = 256;

/// What the engine's spawned tasks report back.
pub(crate) enum Internal {
    PeerConnected { uuid: NodeUuid, sender: FrameSender },
    PeerConnectFailed { uuid: NodeUuid },
    GossipConnected { sender: FrameSender },
    GossipConnectFailed,
}

/// Gossip state, present only when a rendezvous endpoint is configured.
#[derive(Debug)]
pub(crate) struct GossipState {
    directory: GossipDirectory,
    /// Accepts clients when this node is the rendezvous point.
    listener: Option<FrameListener>,
    /// Every live gossip connection, accepted clients and our own dial.
    conns: HashMap<ConnId, FrameSender>,
    /// Our dialed connection to the rendezvous point, if currently up.
    server_conn: Option<ConnId>,
    connect_pending: bool,
    tx: mpsc::Sender<Inbound>,
}

#[derive(Debug)]
pub(crate) struct Engine {
    pub(crate) config: NodeConfig,
    uuid: NodeUuid,
    name: String,
    headers: HashMap<String, String>,
    own_groups: BTreeSet<String>,
    /// Membership version, bumped on every local join/leave.
    status: u8,
    /// Endpoint advertised in Hellos and gossip records.
    advertised: String,
    /// Port the mailbox listens on; advertised in beacons.
    mailbox_port: u16,
    /// Kept alive for its accept task; frames arrive via `inbound_rx`.
    _listener: FrameListener,
    pub(crate) beacon: Option<BeaconSocket>,
    pub(crate) inbound_rx: mpsc::Receiver<Inbound>,
    inbound_tx: mpsc::Sender<Inbound>,
    pub(crate) internal_rx: mpsc::Receiver<Internal>,
    internal_tx: mpsc::Sender<Internal>,
    registry: PeerRegistry,
    groups: GroupRegistry,
    channels: ChannelManager,
    /// Inbound connections attributed by their Hello.
    conn_peers: HashMap<ConnId, NodeUuid>,
    /// Write halves of accepted connections; dropping one closes it.
    inbound_senders: HashMap<ConnId, FrameSender>,
    /// Connections we dialed, by peer.
    outbound_conns: HashMap<ConnId, NodeUuid>,
    gossip: Option<GossipState>,
    pub(crate) gossip_rx: Option<mpsc::Receiver<Inbound>>,
}

impl Engine {
    /// Bind every socket the configuration calls for. Any failure here is
    /// fatal: a node that cannot open its mailbox, beacon, or configured
    /// gossip endpoint must not start.
    pub(crate) async fn bind(identity: Identity, config: NodeConfig) -> Result<Self, MurmurError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(FUNNEL_DEPTH);

        let bind_ip: IpAddr = match config.interface {
            Some(ip) => ip.into(),
            None => Ipv4Addr::UNSPECIFIED.into(),
        };
        let listener =
            FrameListener::bind(SocketAddr::new(bind_ip, 0), config.max_frame, inbound_tx.clone())
                .await?;
        let mailbox_port = listener.local_addr().port();

        let advertised = match &config.endpoint {
            Some(ep) => ep.clone(),
            None => format!("{}:{}", advertised_host(config.interface), mailbox_port),
        };

        let beacon = if config.beacon_port != 0 {
            Some(BeaconSocket::bind(config.interface, config.beacon_port)?)
        } else {
            None
        };

        let mut gossip = None;
        let mut gossip_rx = None;
        if config.gossip_bind.is_some() || config.gossip_connect.is_some() {
            let (gossip_tx, rx) = mpsc::channel(FUNNEL_DEPTH);
            let gossip_listener = match &config.gossip_bind {
                Some(addr) => {
                    let addr: SocketAddr = addr.parse().map_err(|e| {
                        MurmurTransportError::Config(format!("bad gossip bind address {addr}: {e}"))
                    })?;
                    Some(FrameListener::bind(addr, config.max_frame, gossip_tx.clone()).await?)
                }
                None => None,
            };
            let mut conns = HashMap::new();
            let mut server_conn = None;
            if let Some(target) = &config.gossip_connect {
                let sender = connect(target, config.max_frame, gossip_tx.clone()).await?;
                server_conn = Some(sender.conn_id());
                conns.insert(sender.conn_id(), sender);
            }
            let directory = GossipDirectory::new(PeerRecord {
                uuid: identity.uuid,
                endpoint: advertised.clone(),
                name: identity.name.clone(),
            });
            gossip = Some(GossipState {
                directory,
                listener: gossip_listener,
                conns,
                server_conn,
                connect_pending: false,
                tx: gossip_tx,
            });
            gossip_rx = Some(rx);
        }

        let (internal_tx, internal_rx) = mpsc::channel(FUNNEL_DEPTH);
        let registry = PeerRegistry::with_timeouts(config.evasive_ms, config.expiry_ms);

        if config.verbose {
            info!(?config, "verbose diagnostics enabled");
        }
        info!(
            uuid = %identity.uuid,
            name = %identity.name,
            endpoint = %advertised,
            beacon = config.beacon_port,
            "node bound"
        );

        Ok(Self {
            config,
            uuid: identity.uuid,
            name: identity.name,
            headers: identity.headers,
            own_groups: identity.groups.into_iter().collect(),
            status: 0,
            advertised,
            mailbox_port,
            _listener: listener,
            beacon,
            inbound_rx,
            inbound_tx,
            internal_rx,
            internal_tx,
            registry,
            groups: GroupRegistry::new(),
            channels: ChannelManager::new(),
            conn_peers: HashMap::new(),
            inbound_senders: HashMap::new(),
            outbound_conns: HashMap::new(),
            gossip,
            gossip_rx,
        })
    }

    // ── Beacon ───────────────────────────────────────────────────────────

    pub(crate) async fn broadcast_beacon(&self) {
        if let Some(beacon) = &self.beacon {
            let frame = BeaconFrame {
                uuid: self.uuid,
                port: self.mailbox_port,
            };
            if let Err(e) = beacon.broadcast(&frame).await {
                debug!("beacon send failed: {e}");
            }
        }
    }

    pub(crate) fn handle_beacon(
        &mut self,
        frame: BeaconFrame,
        src: SocketAddr,
        mailbox: &MailboxSender,
    ) {
        if frame.uuid == self.uuid {
            return;
        }
        if frame.port == 0 {
            debug!(peer = %frame.uuid.short(), "departure beacon");
            self.drop_remote(frame.uuid, mailbox);
            return;
        }
        let endpoint = format!("{}:{}", src.ip(), frame.port);
        let actions = self.registry.observe(frame.uuid, &endpoint, now_ms());
        self.apply_actions(actions, mailbox);
    }

    // ── Registry actions ─────────────────────────────────────────────────

    fn apply_actions(&mut self, actions: Vec<RegistryAction>, mailbox: &MailboxSender) {
        for action in actions {
            match action {
                RegistryAction::Connect { uuid, endpoint } => self.spawn_dial(uuid, endpoint),
                RegistryAction::Disconnect { uuid } => self.teardown_channel(&uuid),
                RegistryAction::Ping { uuid } => self.send_wire(&uuid, &WireMessage::Ping),
                // EXIT drags the peer out of every group it was in.
                RegistryAction::Event(Event::Exit { uuid, name }) => {
                    mailbox.send(Event::Exit {
                        uuid,
                        name: name.clone(),
                    });
                    for group in self.groups.remove_peer(&uuid) {
                        mailbox.send(Event::Leave {
                            uuid,
                            name: name.clone(),
                            group,
                        });
                    }
                }
                RegistryAction::Event(event) => mailbox.send(event),
            }
        }
    }

    fn spawn_dial(&self, uuid: NodeUuid, endpoint: String) {
        debug!(peer = %uuid.short(), %endpoint, "dialing");
        let inbound = self.inbound_tx.clone();
        let internal = self.internal_tx.clone();
        let max_frame = self.config.max_frame;
        tokio::spawn(async move {
            let dialed =
                tokio::time::timeout(CONNECT_TIMEOUT, connect(&endpoint, max_frame, inbound)).await;
            let result = match dialed {
                Ok(Ok(sender)) => Internal::PeerConnected { uuid, sender },
                Ok(Err(e)) => {
                    debug!(peer = %uuid.short(), "dial failed: {e}");
                    Internal::PeerConnectFailed { uuid }
                }
                Err(_) => {
                    debug!(peer = %uuid.short(), "dial timed out");
                    Internal::PeerConnectFailed { uuid }
                }
            };
            let _ = internal.send(result).await;
        });
    }

    fn teardown_channel(&mut self, uuid: &NodeUuid) {
        self.channels.remove(uuid);
        self.outbound_conns.retain(|_, u| u != uuid);
        let stale: Vec<ConnId> = self
            .conn_peers
            .iter()
            .filter(|(_, u)| *u == uuid)
            .map(|(conn, _)| *conn)
            .collect();
        for conn in stale {
            self.conn_peers.remove(&conn);
            self.inbound_senders.remove(&conn);
        }
    }

    pub(crate) fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::PeerConnected { uuid, sender } => {
                // The peer may have expired or said Goodbye while we dialed.
                if !self.registry.contains(&uuid) {
                    return;
                }
                self.outbound_conns.insert(sender.conn_id(), uuid);
                self.channels.insert(uuid, sender);
                self.registry.channel_up(&uuid, true);
                let hello = self.make_hello();
                self.send_wire(&uuid, &hello);
            }
            Internal::PeerConnectFailed { uuid } => self.registry.connect_failed(&uuid),
            Internal::GossipConnected { sender } => {
                if let Some(g) = &mut self.gossip {
                    debug!("gossip rendezvous reconnected");
                    g.connect_pending = false;
                    g.server_conn = Some(sender.conn_id());
                    g.conns.insert(sender.conn_id(), sender);
                }
            }
            Internal::GossipConnectFailed => {
                if let Some(g) = &mut self.gossip {
                    g.connect_pending = false;
                }
            }
        }
    }

    fn make_hello(&self) -> WireMessage {
        WireMessage::Hello {
            uuid: self.uuid,
            endpoint: self.advertised.clone(),
            name: self.name.clone(),
            groups: self.own_groups.iter().cloned().collect(),
            headers: self.headers.clone(),
            status: self.status,
        }
    }

    // ── Peer channels ────────────────────────────────────────────────────

    pub(crate) fn handle_inbound(&mut self, inbound: Inbound, mailbox: &MailboxSender) {
        match inbound {
            Inbound::Opened { conn, addr, sender } => {
                debug!(conn, %addr, "connection accepted");
                // Hold the write half open; the peer reads closure as failure.
                self.inbound_senders.insert(conn, sender);
            }
            Inbound::Frame { conn, bytes } => self.handle_frame(conn, &bytes, mailbox),
            Inbound::Closed { conn } => {
                if let Some(uuid) = self.outbound_conns.remove(&conn) {
                    debug!(peer = %uuid.short(), "channel lost");
                    self.channels.remove(&uuid);
                    self.registry.channel_up(&uuid, false);
                }
                self.conn_peers.remove(&conn);
                self.inbound_senders.remove(&conn);
            }
        }
    }

    fn handle_frame(&mut self, conn: ConnId, bytes: &[u8], mailbox: &MailboxSender) {
        let msg = match WireMessage::from_bytes(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn, "dropping malformed frame: {e}");
                if !self.conn_peers.contains_key(&conn) {
                    self.inbound_senders.remove(&conn);
                }
                return;
            }
        };

        if let Some(uuid) = self.conn_peers.get(&conn).copied() {
            self.dispatch(uuid, msg, mailbox);
        } else if self.outbound_conns.contains_key(&conn) {
            debug!(conn, "unexpected frame on outbound channel");
        } else if let WireMessage::Hello {
            uuid,
            endpoint,
            name,
            groups,
            headers,
            status,
        } = msg
        {
            if uuid == self.uuid {
                debug!(conn, "connection from self, ignoring");
                return;
            }
            self.conn_peers.insert(conn, uuid);
            let actions = self
                .registry
                .apply_hello(uuid, &endpoint, &name, headers, status, now_ms());
            self.apply_actions(actions, mailbox);
            for group in groups {
                if self.groups.join(&group, uuid) {
                    mailbox.send(Event::Join {
                        uuid,
                        name: name.clone(),
                        group,
                    });
                }
            }
        } else {
            // Nothing is attributable before the handshake.
            debug!(conn, "frame before Hello, closing");
            self.inbound_senders.remove(&conn);
        }
    }

    fn dispatch(&mut self, uuid: NodeUuid, msg: WireMessage, mailbox: &MailboxSender) {
        self.registry.refresh(&uuid, now_ms());
        match msg {
            WireMessage::Hello {
                endpoint,
                name,
                groups,
                headers,
                status,
                ..
            } => {
                // Repeat handshake: refresh identity, absorb new groups.
                let actions = self
                    .registry
                    .apply_hello(uuid, &endpoint, &name, headers, status, now_ms());
                self.apply_actions(actions, mailbox);
                for group in groups {
                    if self.groups.join(&group, uuid) {
                        mailbox.send(Event::Join {
                            uuid,
                            name: name.clone(),
                            group,
                        });
                    }
                }
            }
            WireMessage::Whisper { frames } => {
                mailbox.send(Event::Whisper {
                    uuid,
                    name: self.registry.name_of(&uuid),
                    frames,
                });
            }
            WireMessage::Shout { group, frames } => {
                if self.own_groups.contains(&group) {
                    mailbox.send(Event::Shout {
                        uuid,
                        name: self.registry.name_of(&uuid),
                        group,
                        frames,
                    });
                } else {
                    debug!(peer = %uuid.short(), %group, "shout for a group we are not in");
                }
            }
            WireMessage::Join { group, status } => {
                if !self.registry.check_status(&uuid, status) {
                    warn!(peer = %uuid.short(), "membership status out of sequence");
                }
                if self.groups.join(&group, uuid) {
                    mailbox.send(Event::Join {
                        uuid,
                        name: self.registry.name_of(&uuid),
                        group,
                    });
                }
            }
            WireMessage::Leave { group, status } => {
                if !self.registry.check_status(&uuid, status) {
                    warn!(peer = %uuid.short(), "membership status out of sequence");
                }
                if self.groups.leave(&group, &uuid) {
                    mailbox.send(Event::Leave {
                        uuid,
                        name: self.registry.name_of(&uuid),
                        group,
                    });
                }
            }
            WireMessage::Ping => self.send_wire(&uuid, &WireMessage::PingOk),
            WireMessage::PingOk => {}
            WireMessage::Goodbye => self.drop_remote(uuid, mailbox),
        }
    }

    fn drop_remote(&mut self, uuid: NodeUuid, mailbox: &MailboxSender) {
        let actions = self.registry.remove(&uuid);
        self.apply_actions(actions, mailbox);
    }

    fn send_wire(&mut self, uuid: &NodeUuid, msg: &WireMessage) {
        let bytes = match msg.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("wire encode failed: {e}");
                return;
            }
        };
        if let Err(e) = self.channels.send_to(uuid, bytes) {
            debug!(peer = %uuid.short(), "channel send failed: {e}");
            self.channels.remove(uuid);
            self.registry.channel_up(uuid, false);
        }
    }

    fn broadcast_wire(&mut self, msg: &WireMessage) {
        let bytes = match msg.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("wire encode failed: {e}");
                return;
            }
        };
        let targets = self.channels.peers();
        for uuid in self.channels.fan_out(targets.iter(), &bytes) {
            debug!(peer = %uuid.short(), "broadcast delivery failed, dropping channel");
            self.channels.remove(&uuid);
            self.registry.channel_up(&uuid, false);
        }
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    pub(crate) fn sweep(&mut self, mailbox: &MailboxSender) {
        let now = now_ms();
        let actions = self.registry.expire_sweep(now);
        self.apply_actions(actions, mailbox);
        if let Some(g) = &mut self.gossip {
            g.directory.prune(now, self.config.expiry_ms);
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────

    pub(crate) fn handle_command(&mut self, command: Command, mailbox: &MailboxSender) {
        match command {
            Command::Join { group } => {
                if !self.own_groups.insert(group.clone()) {
                    return;
                }
                self.status = self.status.wrapping_add(1);
                self.broadcast_wire(&WireMessage::Join {
                    group: group.clone(),
                    status: self.status,
                });
                mailbox.send(Event::Join {
                    uuid: self.uuid,
                    name: self.name.clone(),
                    group,
                });
            }
            Command::Leave { group } => {
                if !self.own_groups.remove(&group) {
                    return;
                }
                self.status = self.status.wrapping_add(1);
                self.broadcast_wire(&WireMessage::Leave {
                    group: group.clone(),
                    status: self.status,
                });
                mailbox.send(Event::Leave {
                    uuid: self.uuid,
                    name: self.name.clone(),
                    group,
                });
            }
            Command::Whisper { to, frames, reply } => {
                let result = self.whisper(to, frames);
                let _ = reply.send(result);
            }
            Command::Shout { group, frames } => self.shout(&group, frames),
            Command::SetHeader { key, value } => {
                self.headers.insert(key, value);
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.registry.connected_peers());
            }
            Command::PeerGroups { uuid, reply } => {
                let _ = reply.send(self.groups.groups_of(&uuid));
            }
            Command::PeerHeader { uuid, key, reply } => {
                let _ = reply.send(self.registry.header(&uuid, &key).map(str::to_string));
            }
            Command::Dump => self.dump(),
            Command::Stop => {} // consumed by the loop
        }
    }

    fn whisper(&mut self, to: NodeUuid, frames: Vec<Bytes>) -> Result<(), MurmurError> {
        if !self.registry.is_connected(&to) {
            return Err(MurmurError::UnknownPeer { uuid: to });
        }
        let bytes = WireMessage::Whisper { frames }.to_bytes()?;
        match self.channels.send_to(&to, bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.channels.remove(&to);
                self.registry.channel_up(&to, false);
                Err(e.into())
            }
        }
    }

    fn shout(&mut self, group: &str, frames: Vec<Bytes>) {
        let members = self.groups.members(group);
        if members.is_empty() {
            return;
        }
        let msg = WireMessage::Shout {
            group: group.to_string(),
            frames,
        };
        let bytes = match msg.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("wire encode failed: {e}");
                return;
            }
        };
        for uuid in self.channels.fan_out(members.iter(), &bytes) {
            debug!(peer = %uuid.short(), "shout delivery failed, dropping channel");
            self.channels.remove(&uuid);
            self.registry.channel_up(&uuid, false);
        }
    }

    fn dump(&self) {
        info!(
            uuid = %self.uuid,
            name = %self.name,
            endpoint = %self.advertised,
            status = self.status,
            "node state"
        );
        for uuid in self.registry.connected_peers() {
            info!(
                peer = %uuid,
                name = %self.registry.name_of(&uuid),
                endpoint = self.registry.endpoint_of(&uuid).unwrap_or(""),
                groups = ?self.groups.groups_of(&uuid),
                "peer"
            );
        }
        info!(own = ?self.own_groups, known = ?self.groups.group_names(), "groups");
    }

    // ── Gossip ───────────────────────────────────────────────────────────

    pub(crate) fn gossip_tick(&mut self) {
        let Some(g) = &mut self.gossip else { return };

        // Rendezvous point: relay the full directory to every client.
        if g.listener.is_some() && !g.conns.is_empty() {
            let snapshot = GossipMessage::Publish {
                records: g.directory.snapshot(),
            };
            match snapshot.to_bytes() {
                Ok(bytes) => {
                    for sender in g.conns.values() {
                        let _ = sender.send(bytes.clone());
                    }
                }
                Err(e) => warn!("gossip encode failed: {e}"),
            }
        }

        // Client: keep publishing our record; redial if the link dropped.
        if let Some(target) = self.config.gossip_connect.clone() {
            if let Some(conn) = g.server_conn {
                let publish = GossipMessage::Publish {
                    records: vec![g.directory.local().clone()],
                };
                if let (Ok(bytes), Some(sender)) = (publish.to_bytes(), g.conns.get(&conn)) {
                    let _ = sender.send(bytes);
                }
            } else if !g.connect_pending {
                g.connect_pending = true;
                let internal = self.internal_tx.clone();
                let gossip_tx = g.tx.clone();
                let max_frame = self.config.max_frame;
                tokio::spawn(async move {
                    let dialed =
                        tokio::time::timeout(CONNECT_TIMEOUT, connect(&target, max_frame, gossip_tx))
                            .await;
                    let result = match dialed {
                        Ok(Ok(sender)) => Internal::GossipConnected { sender },
                        _ => Internal::GossipConnectFailed,
                    };
                    let _ = internal.send(result).await;
                });
            }
        }
    }

    pub(crate) fn handle_gossip(&mut self, inbound: Inbound, mailbox: &MailboxSender) {
        let Some(g) = &mut self.gossip else { return };
        match inbound {
            Inbound::Opened { conn, addr, sender } => {
                debug!(conn, %addr, "gossip client connected");
                // Greet newcomers with the directory straight away.
                let snapshot = GossipMessage::Publish {
                    records: g.directory.snapshot(),
                };
                if let Ok(bytes) = snapshot.to_bytes() {
                    let _ = sender.send(bytes);
                }
                g.conns.insert(conn, sender);
            }
            Inbound::Frame { conn, bytes } => {
                let update = match GossipMessage::from_bytes(&bytes) {
                    Ok(GossipMessage::Publish { records }) => {
                        g.directory.handle_publish(records, now_ms())
                    }
                    Err(e) => {
                        debug!(conn, "malformed gossip frame: {e}");
                        return;
                    }
                };
                let now = now_ms();
                for record in update.observed {
                    let actions = self.registry.observe(record.uuid, &record.endpoint, now);
                    self.apply_actions(actions, mailbox);
                }
                for uuid in update.departed {
                    self.drop_remote(uuid, mailbox);
                }
            }
            Inbound::Closed { conn } => {
                g.conns.remove(&conn);
                if g.server_conn == Some(conn) {
                    debug!("gossip rendezvous connection lost");
                    g.server_conn = None;
                }
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    pub(crate) async fn shutdown(&mut self) {
        info!(uuid = %self.uuid, name = %self.name, "node stopping");
        if let Ok(bytes) = WireMessage::Goodbye.to_bytes() {
            let targets = self.channels.peers();
            let _ = self.channels.fan_out(targets.iter(), &bytes);
        }
        if let Some(beacon) = &self.beacon {
            let frame = BeaconFrame {
                uuid: self.uuid,
                port: 0,
            };
            if let Err(e) = beacon.broadcast(&frame).await {
                debug!("departure beacon failed: {e}");
            }
        }
        if let Some(g) = &self.gossip {
            let farewell = GossipMessage::Publish {
                records: vec![g.directory.tombstone()],
            };
            if let Ok(bytes) = farewell.to_bytes() {
                for sender in g.conns.values() {
                    let _ = sender.send(bytes.clone());
                }
            }
        }
        // Writers drain their buffers asynchronously; give them a moment.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// The address other nodes should dial to reach this host.
///
/// With an explicit interface that address wins; otherwise ask the OS for
/// its preferred outbound address (the connect sends no traffic).
fn advertised_host(interface: Option<Ipv4Addr>) -> IpAddr {
    if let Some(ip) = interface {
        if !ip.is_unspecified() {
            return ip.into();
        }
    }
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("192.0.2.1:5670")?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or_else(|_| Ipv4Addr::LOCALHOST.into())
}
