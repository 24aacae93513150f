//! Configuration for the API server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use spindle_core::{KvmConfig, KvmError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the spindle API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// QMP monitor socket of the VM.
    pub qmp_address: PathBuf,

    /// Directory holding the vhost-user controller sockets.
    pub ctrlr_dir: PathBuf,

    /// SPDK JSON-RPC socket.
    pub spdk_address: PathBuf,

    /// Monitor connect and reply timeout (default: 2s).
    pub command_timeout: Duration,

    /// Timeout for device removal confirmation (default: 5s).
    pub operation_timeout: Duration,

    /// Overall deadline for one attach or detach request (default: 30s).
    pub request_timeout: Duration,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let kvm = KvmConfig::default();
        Self {
            qmp_address: kvm.qmp_address,
            ctrlr_dir: kvm.ctrlr_dir,
            spdk_address: PathBuf::from("/var/tmp/spdk.sock"),
            command_timeout: kvm.command_timeout,
            operation_timeout: kvm.operation_timeout,
            request_timeout: Duration::from_secs(30),
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SPINDLE_QMP_ADDRESS` | `/var/run/spindle/qmp.sock` |
    /// | `SPINDLE_CTRLR_DIR` | `/var/run/spindle` |
    /// | `SPINDLE_SPDK_ADDRESS` | `/var/tmp/spdk.sock` |
    /// | `SPINDLE_QMP_TIMEOUT_MS` | `2000` |
    /// | `SPINDLE_OPERATION_TIMEOUT_MS` | `5000` |
    /// | `SPINDLE_REQUEST_TIMEOUT_MS` | `30000` |
    /// | `SPINDLE_HTTP_HOST` | `127.0.0.1` |
    /// | `SPINDLE_HTTP_PORT` | `8080` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let millis = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        let http_host: IpAddr = lookup("SPINDLE_HTTP_HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = lookup("SPINDLE_HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.port());

        Self {
            qmp_address: lookup("SPINDLE_QMP_ADDRESS")
                .map(PathBuf::from)
                .unwrap_or(default.qmp_address),
            ctrlr_dir: lookup("SPINDLE_CTRLR_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.ctrlr_dir),
            spdk_address: lookup("SPINDLE_SPDK_ADDRESS")
                .map(PathBuf::from)
                .unwrap_or(default.spdk_address),
            command_timeout: millis("SPINDLE_QMP_TIMEOUT_MS", default.command_timeout),
            operation_timeout: millis("SPINDLE_OPERATION_TIMEOUT_MS", default.operation_timeout),
            request_timeout: millis("SPINDLE_REQUEST_TIMEOUT_MS", default.request_timeout),
            http_addr: SocketAddr::new(http_host, http_port),
        }
    }

    /// Orchestrator configuration derived from this one.
    pub fn kvm_config(&self) -> Result<KvmConfig, KvmError> {
        KvmConfig::builder()
            .qmp_address(&self.qmp_address)
            .ctrlr_dir(&self.ctrlr_dir)
            .command_timeout(self.command_timeout)
            .operation_timeout(self.operation_timeout)
            .build()
    }

    /// Log warnings for sockets and directories that do not exist yet.
    ///
    /// The VM and the storage engine may start after this server, so nothing
    /// here is fatal.
    pub fn validate_warn(&self) {
        if !self.qmp_address.exists() {
            tracing::warn!("QMP socket not found: {:?}", self.qmp_address);
        }

        if !self.spdk_address.exists() {
            tracing::warn!("SPDK socket not found: {:?}", self.spdk_address);
        }

        if !self.ctrlr_dir.is_dir() {
            tracing::warn!("Controller directory not found: {:?}", self.ctrlr_dir);
        }

        if self.request_timeout < self.operation_timeout {
            tracing::warn!(
                request_timeout_ms = self.request_timeout.as_millis() as u64,
                operation_timeout_ms = self.operation_timeout.as_millis() as u64,
                "Request timeout is shorter than the device removal timeout"
            );
        }
    }
}
