use monmix_protocol::ProtocolError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Console client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected to console")]
    NotConnected,

    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("no reply to `{command}` within {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("connection closed before reply to `{0}`")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Transport-level failures; these mean the link itself is suspect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Connect { .. } | Self::Io(_) | Self::Closed(_)
        )
    }
}
