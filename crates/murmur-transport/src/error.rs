/// Errors returned by the murmur transport layer.
#[derive(Debug, thiserror::Error)]
pub enum MurmurTransportError {
    #[error("failed to bind socket: {0}")]
    Bind(#[source] anyhow::Error),

    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(#[source] anyhow::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("channel is shut down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}
