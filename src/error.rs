//! Error types for the partition supplier.

use crate::types::NodeId;
use thiserror::Error;

/// Result type alias for supply operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the partition supplier.
#[derive(Error, Debug)]
pub enum Error {
    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Cluster membership errors.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Server is busy, too many pending demands (backpressure).
    #[error("server busy: too many pending demands ({pending})")]
    ServerBusy { pending: usize },
}

impl Error {
    /// Check if this error means the remote member left the cluster.
    ///
    /// Such failures terminate the current processing call but are not
    /// worth more than a debug log line.
    pub fn is_member_gone(&self) -> bool {
        matches!(self, Error::Membership(MembershipError::NodeLeft(_)))
    }
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Failed to send message.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Frame is shorter than its length prefix claims.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },
}

/// Cluster membership errors.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// Node left the cluster while a message was in flight.
    #[error("node left cluster: {0}")]
    NodeLeft(NodeId),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Network(NetworkError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_gone_classification() {
        assert!(Error::Membership(MembershipError::NodeLeft(3)).is_member_gone());
        assert!(!Error::Network(NetworkError::SendFailed("reset".into())).is_member_gone());
        assert!(!Error::Timeout.is_member_gone());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Network(NetworkError::TruncatedFrame {
            expected: 12,
            actual: 3,
        });
        assert_eq!(
            err.to_string(),
            "network error: truncated frame: expected 12 bytes, got 3"
        );
    }
}
