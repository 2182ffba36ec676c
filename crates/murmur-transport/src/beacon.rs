//! UDP beacon discovery.
//!
//! A node periodically broadcasts a 22-byte datagram on a well-known port:
//!
//! ```text
//! +-----------+---------+------------+--------------+
//! | signature | version | node uuid  | mailbox port |
//! | 3 bytes   | 1 byte  | 16 bytes   | 2 bytes (BE) |
//! +-----------+---------+------------+--------------+
//! ```
//!
//! The receiver reconstructs the peer's endpoint from the datagram's source
//! address plus the advertised mailbox port. A mailbox port of zero signals
//! explicit departure. Datagrams with a foreign signature or version are
//! discarded silently.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::MurmurTransportError;
use crate::types::NodeUuid;

/// Beacon protocol signature.
pub const BEACON_SIGNATURE: [u8; 3] = *b"ZRE";

/// Beacon protocol version.
pub const BEACON_VERSION: u8 = 1;

/// Well-known UDP beacon port.
pub const DEFAULT_BEACON_PORT: u16 = 5670;

/// Encoded size of a beacon datagram.
const BEACON_LEN: usize = 22;

/// The decoded contents of one beacon datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    /// The announcing node's identity.
    pub uuid: NodeUuid,
    /// TCP mailbox port the node accepts peer connections on.
    /// Zero means the node is leaving the network.
    pub port: u16,
}

impl BeaconFrame {
    /// Pack into the fixed 22-byte wire layout.
    pub fn encode(&self) -> [u8; BEACON_LEN] {
        let mut buf = [0u8; BEACON_LEN];
        buf[..3].copy_from_slice(&BEACON_SIGNATURE);
        buf[3] = BEACON_VERSION;
        buf[4..20].copy_from_slice(self.uuid.as_bytes());
        buf[20..22].copy_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Parse a datagram. Returns `None` for anything that is not a
    /// well-formed beacon of our signature and version.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != BEACON_LEN {
            return None;
        }
        if data[..3] != BEACON_SIGNATURE || data[3] != BEACON_VERSION {
            return None;
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&data[4..20]);
        let port = u16::from_be_bytes([data[20], data[21]]);
        Some(Self {
            uuid: NodeUuid::from_bytes(uuid),
            port,
        })
    }
}

/// The UDP socket a node beacons from and listens for peers on.
///
/// Bound with `SO_REUSEADDR` (and `SO_REUSEPORT` on unix) so several nodes
/// on one host can share the well-known port.
#[derive(Debug)]
pub struct BeaconSocket {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl BeaconSocket {
    /// Bind the beacon socket on `port`, optionally restricted to one
    /// interface address. Fatal on failure — a node that cannot bind its
    /// beacon socket cannot discover anyone.
    pub fn bind(interface: Option<Ipv4Addr>, port: u16) -> Result<Self, MurmurTransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;
        #[cfg(unix)]
        socket
            .set_reuse_port(true)
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;

        // Listen on all interfaces; beacons from any NIC should reach us.
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| MurmurTransportError::Bind(e.into()))?;

        let destination = SocketAddr::V4(SocketAddrV4::new(
            interface
                .map(broadcast_address)
                .unwrap_or(Ipv4Addr::BROADCAST),
            port,
        ));

        Ok(Self {
            socket,
            destination,
        })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, MurmurTransportError> {
        self.socket
            .local_addr()
            .map_err(|e| MurmurTransportError::Bind(e.into()))
    }

    /// Where broadcasts are sent. Defaults to the limited broadcast
    /// address on the bound port.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Override the broadcast destination — a directed (unicast) beacon
    /// target for routed networks and loopback testing.
    pub fn set_destination(&mut self, dest: SocketAddr) {
        self.destination = dest;
    }

    /// Broadcast one beacon datagram.
    pub async fn broadcast(&self, frame: &BeaconFrame) -> Result<(), MurmurTransportError> {
        self.socket
            .send_to(&frame.encode(), self.destination)
            .await
            .map_err(|e| MurmurTransportError::Send(e.to_string()))?;
        Ok(())
    }

    /// Receive the next well-formed beacon and its source address.
    ///
    /// Malformed and foreign datagrams are logged at debug and skipped;
    /// only a socket-level failure surfaces as an error.
    pub async fn recv(&self) -> Result<(BeaconFrame, SocketAddr), MurmurTransportError> {
        let mut buf = [0u8; 64];
        loop {
            let (len, src) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| MurmurTransportError::Receive(e.into()))?;
            match BeaconFrame::decode(&buf[..len]) {
                Some(frame) => return Ok((frame, src)),
                None => {
                    tracing::debug!(%src, len, "discarding malformed beacon datagram");
                }
            }
        }
    }
}

/// Directed broadcast address for a /24-style local segment.
///
/// Without querying interface netmasks we assume the common case; nodes on
/// exotic subnets can rely on the limited broadcast default instead by not
/// setting an interface.
fn broadcast_address(interface: Ipv4Addr) -> Ipv4Addr {
    if interface.is_loopback() {
        return interface;
    }
    let o = interface.octets();
    Ipv4Addr::new(o[0], o[1], o[2], 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> BeaconFrame {
        BeaconFrame {
            uuid: NodeUuid::new_random(),
            port: 49152,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let f = frame();
        let decoded = BeaconFrame::decode(&f.encode()).expect("decode");
        assert_eq!(decoded, f);
    }

    #[test]
    fn encode_layout() {
        let f = frame();
        let buf = f.encode();
        assert_eq!(&buf[..3], b"ZRE");
        assert_eq!(buf[3], BEACON_VERSION);
        assert_eq!(&buf[4..20], f.uuid.as_bytes());
        assert_eq!(u16::from_be_bytes([buf[20], buf[21]]), 49152);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(BeaconFrame::decode(b"ZRE").is_none());
        assert!(BeaconFrame::decode(&[0u8; 64]).is_none());
        assert!(BeaconFrame::decode(&[]).is_none());
    }

    #[test]
    fn decode_rejects_foreign_signature() {
        let mut buf = frame().encode();
        buf[0] = b'X';
        assert!(BeaconFrame::decode(&buf).is_none());
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut buf = frame().encode();
        buf[3] = 99;
        assert!(BeaconFrame::decode(&buf).is_none());
    }

    #[test]
    fn departure_beacon_port_zero() {
        let f = BeaconFrame {
            uuid: NodeUuid::new_random(),
            port: 0,
        };
        let decoded = BeaconFrame::decode(&f.encode()).expect("decode");
        assert_eq!(decoded.port, 0);
    }

    #[tokio::test]
    async fn directed_beacon_over_loopback() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .try_init();

        let a = BeaconSocket::bind(Some(Ipv4Addr::LOCALHOST), 0).expect("bind a");
        let mut b = BeaconSocket::bind(Some(Ipv4Addr::LOCALHOST), 0).expect("bind b");

        let a_port = a.socket.local_addr().expect("addr").port();
        b.set_destination(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            a_port,
        )));

        let sent = frame();
        b.broadcast(&sent).await.expect("broadcast");

        let (received, src) = tokio::time::timeout(std::time::Duration::from_secs(2), a.recv())
            .await
            .expect("timely")
            .expect("recv");
        assert_eq!(received, sent);
        assert!(src.ip().is_loopback());
    }
}
