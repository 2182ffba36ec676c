use std::collections::HashMap;

use bytes::Bytes;

use crate::types::NodeUuid;

/// The kind of an [`Event`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Enter,
    Join,
    Leave,
    Exit,
    Whisper,
    Shout,
}

/// One entry in the node's event stream.
///
/// Events are immutable, delivered FIFO, and consumed exactly once by
/// [`Node::recv`](crate::Node::recv). Every event names the peer it is
/// about; message events carry the opaque frame payload untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A peer completed its handshake and is now connected.
    Enter {
        uuid: NodeUuid,
        name: String,
        endpoint: String,
        headers: HashMap<String, String>,
    },
    /// A peer (possibly this node) joined a group.
    Join {
        uuid: NodeUuid,
        name: String,
        group: String,
    },
    /// A peer (possibly this node) left a group.
    Leave {
        uuid: NodeUuid,
        name: String,
        group: String,
    },
    /// A peer departed, explicitly or by liveness expiry.
    Exit { uuid: NodeUuid, name: String },
    /// A direct message from one peer.
    Whisper {
        uuid: NodeUuid,
        name: String,
        frames: Vec<Bytes>,
    },
    /// A group broadcast from one peer.
    Shout {
        uuid: NodeUuid,
        name: String,
        group: String,
        frames: Vec<Bytes>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Enter { .. } => EventKind::Enter,
            Event::Join { .. } => EventKind::Join,
            Event::Leave { .. } => EventKind::Leave,
            Event::Exit { .. } => EventKind::Exit,
            Event::Whisper { .. } => EventKind::Whisper,
            Event::Shout { .. } => EventKind::Shout,
        }
    }

    /// The peer this event is about.
    pub fn sender(&self) -> NodeUuid {
        match self {
            Event::Enter { uuid, .. }
            | Event::Join { uuid, .. }
            | Event::Leave { uuid, .. }
            | Event::Exit { uuid, .. }
            | Event::Whisper { uuid, .. }
            | Event::Shout { uuid, .. } => *uuid,
        }
    }

    /// The peer's human-readable name.
    pub fn peer_name(&self) -> &str {
        match self {
            Event::Enter { name, .. }
            | Event::Join { name, .. }
            | Event::Leave { name, .. }
            | Event::Exit { name, .. }
            | Event::Whisper { name, .. }
            | Event::Shout { name, .. } => name,
        }
    }

    /// The group name, for JOIN/LEAVE/SHOUT events.
    pub fn group(&self) -> Option<&str> {
        match self {
            Event::Join { group, .. }
            | Event::Leave { group, .. }
            | Event::Shout { group, .. } => Some(group),
            _ => None,
        }
    }

    /// The message frames, for WHISPER/SHOUT events.
    pub fn frames(&self) -> Option<&[Bytes]> {
        match self {
            Event::Whisper { frames, .. } | Event::Shout { frames, .. } => Some(frames),
            _ => None,
        }
    }

    /// The first message frame decoded as UTF-8, the common chat case.
    pub fn text(&self) -> Option<&str> {
        self.frames()
            .and_then(|f| f.first())
            .and_then(|b| std::str::from_utf8(b).ok())
    }
}
