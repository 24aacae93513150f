//! Error types for spindle-spdk.

use thiserror::Error;

/// Result type alias for storage engine calls.
pub type Result<T> = std::result::Result<T, SpdkError>;

/// Errors that can occur during a storage engine call.
#[derive(Debug, Error)]
pub enum SpdkError {
    /// Failed to reach the engine's RPC socket
    #[error("connection failed: {0}")]
    Connection(String),

    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response did not follow JSON-RPC 2.0
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error object returned by the engine
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code from the engine
        code: i32,
        /// Error message from the engine
        message: String,
    },

    /// The engine did not answer in time
    #[error("RPC timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The call succeeded but reported a negative result
    #[error("{method} returned an unexpected result")]
    UnexpectedResult {
        /// Method that was called
        method: String,
    },
}

impl SpdkError {
    /// True when the connection is no longer usable after this error.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Io(_) | Self::Json(_) | Self::Protocol(_) | Self::Timeout(_)
        )
    }
}
