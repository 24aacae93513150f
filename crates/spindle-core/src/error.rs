//! Error types for spindle-core.

use crate::outcome::DetachOutcome;
use spindle_qmp::QmpError;
use spindle_spdk::SpdkError;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, KvmError>;

/// Errors returned by attach and detach.
#[derive(Debug, Error)]
pub enum KvmError {
    /// Could not open or negotiate the monitor connection
    #[error("failed to create QMP monitor: {0}")]
    MonitorCreation(#[source] QmpError),

    /// The storage engine call failed or returned a negative result
    #[error("storage engine call failed: {0}")]
    StorageEngineCall(#[source] SpdkError),

    /// `chardev-add` failed
    #[error("failed to add chardev: {0}")]
    ChardevAttach(#[source] QmpError),

    /// `device_add` failed; the chardev was rolled back
    #[error("failed to add PCI device: {0}")]
    PciDeviceAttach(#[source] QmpError),

    /// One or two of the three detach steps succeeded
    #[error("device partially deleted: {0}")]
    DevicePartiallyDeleted(DetachOutcome),

    /// None of the three detach steps succeeded
    #[error("device not deleted: {0}")]
    DeviceNotDeleted(DetachOutcome),

    /// Device id cannot be used as a monitor id and socket name
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
