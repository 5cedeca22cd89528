//! Error types for peer operations

use duplex_protocol::RpcError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for peer operations
pub type Result<T> = std::result::Result<T, PeerError>;

/// Errors surfaced to code that drives a [`Peer`](crate::Peer)
#[derive(Debug, Error)]
pub enum PeerError {
    /// Failure reported by a handler, local or on the other side
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// The connection is gone; no response will ever arrive
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The call did not settle within the configured timeout
    #[error("Call to '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// IO errors from the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PeerError {
    /// The error payload, when the failure came from a handler.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            PeerError::Rpc(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, PeerError::ConnectionClosed(_))
    }
}

impl From<RpcError> for PeerError {
    fn from(err: RpcError) -> Self {
        PeerError::Rpc(err)
    }
}

/// Used when a forwarded call fails and the failure has to go back on the wire.
impl From<PeerError> for RpcError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Rpc(rpc) => rpc,
            other => RpcError::internal(other.to_string()),
        }
    }
}
