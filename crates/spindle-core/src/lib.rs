//! # spindle-core
//!
//! Hotplug of SPDK-backed virtio-blk devices into a running QEMU guest.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 API layer (spindle-server)               │
//! └──────────────────────────────┬───────────────────────────┘
//!                                │ attach / detach
//!                                ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   DeviceOrchestrator                     │
//! │   naming: device id ─▶ chardev id, vhost socket path     │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │ JsonRpc                   │ fresh Monitor per call
//!                 ▼                           ▼
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │ SPDK vhost controller    │   │ QEMU QMP socket          │
//! │ (spindle-spdk)           │   │ (spindle-qmp)            │
//! └──────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use spindle_core::{DeviceOrchestrator, KvmConfig, PciEndpoint, VirtioBlk};
//! use spindle_spdk::SpdkClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> spindle_core::Result<()> {
//! let config = KvmConfig::builder()
//!     .qmp_address("/var/run/qemu/qmp.sock")
//!     .ctrlr_dir("/var/tmp")
//!     .build()?;
//! let orchestrator = DeviceOrchestrator::new(Arc::new(SpdkClient::new("/var/tmp/spdk.sock")), config);
//!
//! let device = VirtioBlk {
//!     id: "virtio-blk-42".into(),
//!     pcie_id: PciEndpoint { physical_function: 42, ..Default::default() },
//!     volume_id: "Malloc42".into(),
//!     max_io_qps: 1,
//! };
//! orchestrator.attach(&device).await?;
//! orchestrator.detach(&device.id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod device;
mod error;
pub mod naming;
mod orchestrator;
mod outcome;

pub use config::{KvmConfig, KvmConfigBuilder};
pub use device::{PciEndpoint, VirtioBlk};
pub use error::{KvmError, Result};
pub use orchestrator::{DeviceOrchestrator, DEVICE_DELETED_EVENT, VIRTIO_BLK_DRIVER};
pub use outcome::{aggregate, DetachOutcome, StepOutcome, Verdict};
pub use spindle_qmp::QmpError;
pub use spindle_spdk::SpdkError;
