use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node's process-unique identity — a 16-byte v4 UUID.
///
/// Stable for the lifetime of the process; peers key all state by it, so a
/// node that restarts comes back as a brand-new peer. Displayed as 32
/// lowercase hex characters without hyphens.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeUuid(Uuid);

impl NodeUuid {
    /// Generate a fresh random identity.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reconstruct from raw bytes (e.g. out of a beacon datagram).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short form — the first 6 hex characters. Used as the default
    /// human-readable node name.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(6);
        s
    }
}

impl fmt::Display for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for NodeUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeUuid({})", self.short())
    }
}

impl FromStr for NodeUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_32_hex_chars() {
        let id = NodeUuid::new_random();
        let s = id.to_string();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_is_prefix() {
        let id = NodeUuid::new_random();
        assert_eq!(id.short().len(), 6);
        assert!(id.to_string().starts_with(&id.short()));
    }

    #[test]
    fn bytes_roundtrip() {
        let id = NodeUuid::new_random();
        let bytes = *id.as_bytes();
        assert_eq!(NodeUuid::from_bytes(bytes), id);
    }

    #[test]
    fn parse_roundtrip() {
        let id = NodeUuid::new_random();
        let parsed: NodeUuid = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<NodeUuid>().is_err());
    }

    #[test]
    fn random_ids_are_unique() {
        assert_ne!(NodeUuid::new_random(), NodeUuid::new_random());
    }
}
