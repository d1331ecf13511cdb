use thiserror::Error;

use crate::core::peer::PeerId;
use crate::core::protocol::{ErrorKind, ErrorReply};

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Not connected to the directory")]
    NotConnected,

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Remote error: {0}")]
    RemoteError(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl P2PError {
    /// True for failures of the link itself rather than of the remote operation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            P2PError::ConnectionFailed(_)
                | P2PError::NetworkError(_)
                | P2PError::Timeout(_)
                | P2PError::IoError(_)
                | P2PError::MessageTooLarge(_)
        )
    }

    /// Encode this error for the wire. Transport-ish errors collapse into `Internal`.
    pub fn to_reply(&self) -> ErrorReply {
        let (kind, message) = match self {
            P2PError::CapacityExceeded(msg) => (ErrorKind::CapacityExceeded, msg.clone()),
            P2PError::StorageError(msg) => (ErrorKind::Storage, msg.clone()),
            P2PError::NotConnected => (ErrorKind::NotConnected, self.to_string()),
            P2PError::UnsupportedOperation(op) => (ErrorKind::Unsupported, op.clone()),
            other => (ErrorKind::Internal, other.to_string()),
        };
        ErrorReply { kind, message }
    }

    pub fn from_reply(reply: ErrorReply) -> Self {
        match reply.kind {
            ErrorKind::CapacityExceeded => P2PError::CapacityExceeded(reply.message),
            ErrorKind::Storage => P2PError::StorageError(reply.message),
            ErrorKind::NotConnected => P2PError::NotConnected,
            ErrorKind::Unsupported => P2PError::UnsupportedOperation(reply.message),
            ErrorKind::Internal => P2PError::RemoteError(reply.message),
        }
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for P2PError {
    fn from(err: toml::de::Error) -> Self {
        P2PError::ConfigError(err.to_string())
    }
}
