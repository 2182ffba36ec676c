use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::MurmurError;
use crate::types::NodeUuid;

/// One message on a reliable peer channel.
///
/// Serialized as MessagePack. The first message on every connection must
/// be [`WireMessage::Hello`] — it binds the connection to the sender's
/// identity; frames arriving before a Hello are discarded. Message bodies
/// (`frames`) are opaque to the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Handshake: the sender introduces itself and its current state.
    Hello {
        uuid: NodeUuid,
        /// The sender's advertised mailbox endpoint (`host:port`).
        endpoint: String,
        name: String,
        /// Groups the sender currently belongs to.
        groups: Vec<String>,
        /// Advertised header metadata.
        headers: HashMap<String, String>,
        /// Membership version at handshake time.
        status: u8,
    },
    /// Direct message to the receiving node.
    Whisper { frames: Vec<Bytes> },
    /// Broadcast to one group; delivered only if the receiver is a member.
    Shout { group: String, frames: Vec<Bytes> },
    /// The sender joined a group.
    Join { group: String, status: u8 },
    /// The sender left a group.
    Leave { group: String, status: u8 },
    /// Liveness probe for an evasive peer.
    Ping,
    /// Answer to a Ping.
    PingOk,
    /// Explicit departure; the receiver drops the sender immediately.
    Goodbye,
}

impl WireMessage {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Bytes, MurmurError> {
        Ok(Bytes::from(rmp_serde::to_vec(self)?))
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, MurmurError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(uuid: NodeUuid) -> WireMessage {
        let mut headers = HashMap::new();
        headers.insert("X-App".to_string(), "demo".to_string());
        WireMessage::Hello {
            uuid,
            endpoint: "192.168.1.5:49200".into(),
            name: "alice".into(),
            groups: vec!["chat".into(), "ops".into()],
            headers,
            status: 2,
        }
    }

    #[test]
    fn hello_roundtrip() {
        let uuid = NodeUuid::new_random();
        let msg = hello(uuid);
        let bytes = msg.to_bytes().expect("serialize");
        let decoded = WireMessage::from_bytes(&bytes).expect("deserialize");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn whisper_preserves_multi_frame_body() {
        let msg = WireMessage::Whisper {
            frames: vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b""),
                Bytes::from(vec![0u8, 255, 128]),
            ],
        };
        let decoded = WireMessage::from_bytes(&msg.to_bytes().expect("serialize"))
            .expect("deserialize");
        let WireMessage::Whisper { frames } = decoded else {
            panic!("expected whisper");
        };
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert!(frames[1].is_empty());
        assert_eq!(&frames[2][..], &[0u8, 255, 128]);
    }

    #[test]
    fn shout_carries_group() {
        let msg = WireMessage::Shout {
            group: "chat".into(),
            frames: vec![Bytes::from_static(b"hello")],
        };
        let decoded = WireMessage::from_bytes(&msg.to_bytes().expect("serialize"))
            .expect("deserialize");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn control_messages_roundtrip() {
        for msg in [
            WireMessage::Ping,
            WireMessage::PingOk,
            WireMessage::Goodbye,
            WireMessage::Join {
                group: "chat".into(),
                status: 1,
            },
            WireMessage::Leave {
                group: "chat".into(),
                status: 2,
            },
        ] {
            let decoded = WireMessage::from_bytes(&msg.to_bytes().expect("serialize"))
                .expect("deserialize");
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn garbage_bytes_rejected() {
        assert!(WireMessage::from_bytes(b"definitely not msgpack").is_err());
        assert!(WireMessage::from_bytes(&[]).is_err());
    }
}
