//! Orchestrator configuration.

use crate::error::KvmError;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`DeviceOrchestrator`](crate::DeviceOrchestrator).
#[derive(Debug, Clone)]
pub struct KvmConfig {
    /// Path to the QMP monitor socket of the running VM.
    pub qmp_address: PathBuf,
    /// Directory in which the storage engine creates vhost-user sockets.
    pub ctrlr_dir: PathBuf,
    /// Timeout for connecting to the monitor and for each command reply
    /// (default: 2s).
    pub command_timeout: Duration,
    /// Timeout for asynchronous confirmation events such as
    /// `DEVICE_DELETED` (default: 5s).
    pub operation_timeout: Duration,
}

impl Default for KvmConfig {
    fn default() -> Self {
        Self {
            qmp_address: PathBuf::from("/var/run/spindle/qmp.sock"),
            ctrlr_dir: PathBuf::from("/var/run/spindle"),
            command_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl KvmConfig {
    /// Create a new config builder.
    pub fn builder() -> KvmConfigBuilder {
        KvmConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), KvmError> {
        if self.qmp_address.as_os_str().is_empty() {
            return Err(KvmError::Config("qmp_address is required".into()));
        }
        if self.ctrlr_dir.as_os_str().is_empty() {
            return Err(KvmError::Config("ctrlr_dir is required".into()));
        }
        if self.command_timeout.is_zero() {
            return Err(KvmError::Config("command_timeout must be > 0".into()));
        }
        if self.operation_timeout.is_zero() {
            return Err(KvmError::Config("operation_timeout must be > 0".into()));
        }
        if self.command_timeout > self.operation_timeout {
            return Err(KvmError::Config(
                "command_timeout must not exceed operation_timeout".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for KvmConfig.
#[derive(Debug, Default)]
pub struct KvmConfigBuilder {
    config: KvmConfig,
}

impl KvmConfigBuilder {
    /// Set the monitor socket path.
    pub fn qmp_address(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.qmp_address = path.into();
        self
    }

    /// Set the vhost-user socket directory.
    pub fn ctrlr_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ctrlr_dir = path.into();
        self
    }

    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Set the event timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<KvmConfig, KvmError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
