//! Error types for spindle-qmp.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, QmpError>;

/// Errors that can occur while talking to a QMP monitor.
#[derive(Debug, Error)]
pub enum QmpError {
    /// The monitor socket could not be reached
    #[error("failed to connect to monitor: {0}")]
    Connect(#[source] std::io::Error),

    /// I/O error on an established connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be parsed or classified
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Greeting or capabilities negotiation failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The monitor answered a command with an error reply
    #[error("command {command} rejected: {class}: {desc}")]
    Command {
        /// Command that was rejected
        command: String,
        /// QMP error class, e.g. `GenericError`
        class: String,
        /// Human readable description from the monitor
        desc: String,
    },

    /// No reply or event arrived before the deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The monitor closed the connection
    #[error("monitor connection closed")]
    Closed,
}

impl QmpError {
    /// True when the peer could not be talked to at all, as opposed to the
    /// peer rejecting a well-formed command.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Command { .. })
    }

    /// True when a deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
