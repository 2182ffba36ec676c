use crate::types::NodeUuid;

/// Protocol-level errors for murmur.
///
/// Malformed inbound data never surfaces here — it is dropped before the
/// event stream. These are the failures the embedding application can act
/// on: startup problems, sends to unknown peers, a stopped node.
#[derive(Debug, thiserror::Error)]
pub enum MurmurError {
    #[error("transport error: {0}")]
    Transport(#[from] murmur_transport::MurmurTransportError),

    #[error("unknown peer: {uuid}")]
    UnknownPeer { uuid: NodeUuid },

    #[error("node is not running")]
    NotRunning,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<rmp_serde::encode::Error> for MurmurError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MurmurError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MurmurError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MurmurError::Deserialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_peer() {
        let uuid = NodeUuid::new_random();
        let err = MurmurError::UnknownPeer { uuid };
        assert_eq!(err.to_string(), format!("unknown peer: {uuid}"));
    }

    #[test]
    fn display_not_running() {
        assert_eq!(MurmurError::NotRunning.to_string(), "node is not running");
    }

    #[test]
    fn transport_error_wraps() {
        let err: MurmurError = murmur_transport::MurmurTransportError::Shutdown.into();
        assert_eq!(err.to_string(), "transport error: channel is shut down");
    }
}
