//! virtio-blk attach and detach.
//!
//! A device exists in two external systems: the storage engine (a vhost-user
//! block controller) and the VM monitor (a chardev bound to the controller's
//! socket plus a `vhost-user-blk-pci` device using that chardev). Neither
//! side knows about the other, so this module sequences them:
//!
//! ```text
//! attach:  vhost_create_blk_controller ─▶ chardev-add ─▶ device_add
//!                                              ▲             │ fails
//!                                              └─ chardev-remove
//!
//! detach:  device_del + DEVICE_DELETED ─▶ chardev-remove ─▶ vhost_delete_controller
//!          (every step runs; results are aggregated)
//! ```
//!
//! Each call opens its own monitor connection and closes it before
//! returning.

use crate::config::KvmConfig;
use crate::device::VirtioBlk;
use crate::error::{KvmError, Result};
use crate::naming;
use crate::outcome::{DetachOutcome, StepOutcome, Verdict};
use serde_json::{json, Value};
use spindle_qmp::{Monitor, QmpError};
use spindle_spdk::{
    vhost, JsonRpc, SpdkError, VhostCreateBlkControllerParams, VhostDeleteControllerParams,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monitor event confirming a device has left the guest.
pub const DEVICE_DELETED_EVENT: &str = "DEVICE_DELETED";

/// Driver of the guest-facing PCI device.
pub const VIRTIO_BLK_DRIVER: &str = "vhost-user-blk-pci";

/// Remaining time until an optional caller deadline.
#[derive(Debug, Clone, Copy)]
struct Budget {
    deadline: Option<Instant>,
}

impl Budget {
    /// Cap a step timeout to what is left of the deadline.
    fn cap(&self, timeout: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        }
    }

    /// Run a storage engine call within the deadline.
    async fn engine_call<F>(&self, call: F) -> std::result::Result<(), SpdkError>
    where
        F: Future<Output = std::result::Result<(), SpdkError>>,
    {
        let Some(deadline) = self.deadline else {
            return call.await;
        };
        let available = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(SpdkError::Timeout(available)),
        }
    }
}

/// Attaches and detaches virtio-blk devices.
///
/// Stateless between calls; concurrent calls for the same device id must be
/// serialized by the caller.
pub struct DeviceOrchestrator {
    rpc: Arc<dyn JsonRpc>,
    config: KvmConfig,
}

impl DeviceOrchestrator {
    /// Create an orchestrator over a storage engine client.
    pub fn new(rpc: Arc<dyn JsonRpc>, config: KvmConfig) -> Self {
        tracing::info!(
            qmp_address = %config.qmp_address.display(),
            ctrlr_dir = %config.ctrlr_dir.display(),
            command_timeout_ms = config.command_timeout.as_millis() as u64,
            operation_timeout_ms = config.operation_timeout.as_millis() as u64,
            "Creating device orchestrator"
        );
        Self { rpc, config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &KvmConfig {
        &self.config
    }

    /// Attach a device with no caller deadline.
    ///
    /// See [`attach_until`](Self::attach_until).
    pub async fn attach(&self, device: &VirtioBlk) -> Result<VirtioBlk> {
        self.attach_until(device, None).await
    }

    /// Attach a device.
    ///
    /// This will:
    /// 1. Create the vhost-user block controller in the storage engine
    /// 2. Connect to the monitor and add a chardev for the controller socket
    /// 3. Add the `vhost-user-blk-pci` device, removing the chardev again if
    ///    this fails
    ///
    /// The storage engine controller is left in place when a later step
    /// fails.
    ///
    /// # Errors
    ///
    /// [`KvmError::StorageEngineCall`], [`KvmError::MonitorCreation`],
    /// [`KvmError::ChardevAttach`] or [`KvmError::PciDeviceAttach`],
    /// according to the step that failed.
    pub async fn attach_until(
        &self,
        device: &VirtioBlk,
        deadline: Option<Instant>,
    ) -> Result<VirtioBlk> {
        ensure_valid_id(&device.id)?;
        let budget = Budget { deadline };
        let start = std::time::Instant::now();
        tracing::info!(
            device_id = %device.id,
            volume_id = %device.volume_id,
            physical_function = device.pcie_id.physical_function,
            "Attaching virtio-blk device"
        );

        let params = VhostCreateBlkControllerParams {
            ctrlr: device.id.clone(),
            dev_name: device.volume_id.clone(),
        };
        budget
            .engine_call(vhost::create_blk_controller(self.rpc.as_ref(), &params))
            .await
            .map_err(|e| {
                tracing::error!(
                    device_id = %device.id,
                    error = %e,
                    "Storage engine controller creation failed"
                );
                KvmError::StorageEngineCall(e)
            })?;
        tracing::debug!(device_id = %device.id, "Storage engine controller created");

        let mut monitor = self.connect(&budget).await?;
        let plugged = self.plug(&mut monitor, device, &budget).await;
        monitor.disconnect().await;
        plugged?;

        tracing::info!(
            device_id = %device.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "virtio-blk device attached"
        );
        Ok(device.clone())
    }

    /// Detach a device with no caller deadline.
    ///
    /// See [`detach_until`](Self::detach_until).
    pub async fn detach(&self, device_id: &str) -> Result<()> {
        self.detach_until(device_id, None).await
    }

    /// Detach a device.
    ///
    /// Connects to the monitor, then runs every step regardless of earlier
    /// failures:
    /// 1. `device_del`, confirmed by a `DEVICE_DELETED` event for the id
    /// 2. `chardev-remove`
    /// 3. storage engine controller deletion
    ///
    /// # Errors
    ///
    /// [`KvmError::MonitorCreation`] if the monitor is unreachable (nothing
    /// is attempted), [`KvmError::DevicePartiallyDeleted`] if one or two
    /// steps succeeded, [`KvmError::DeviceNotDeleted`] if none did.
    pub async fn detach_until(&self, device_id: &str, deadline: Option<Instant>) -> Result<()> {
        ensure_valid_id(device_id)?;
        let budget = Budget { deadline };
        let start = std::time::Instant::now();
        tracing::info!(device_id = %device_id, "Detaching virtio-blk device");

        let mut monitor = self.connect(&budget).await?;

        let pci_device: StepOutcome = self.unplug(&mut monitor, device_id, &budget).await.into();
        if let StepOutcome::Failed(reason) = &pci_device {
            tracing::warn!(device_id = %device_id, reason = %reason, "PCI device removal failed");
        }

        let chardev_id = naming::chardev_id(device_id);
        let chardev: StepOutcome = monitor
            .execute_within(
                "chardev-remove",
                Some(json!({ "id": chardev_id })),
                budget.cap(self.config.command_timeout),
            )
            .await
            .map(drop)
            .into();
        if let StepOutcome::Failed(reason) = &chardev {
            tracing::warn!(device_id = %device_id, reason = %reason, "Chardev removal failed");
        }
        monitor.disconnect().await;

        let params = VhostDeleteControllerParams {
            ctrlr: device_id.to_string(),
        };
        let storage: StepOutcome = budget
            .engine_call(vhost::delete_controller(self.rpc.as_ref(), &params))
            .await
            .into();
        if let StepOutcome::Failed(reason) = &storage {
            tracing::warn!(
                device_id = %device_id,
                reason = %reason,
                "Storage engine controller deletion failed"
            );
        }

        let outcome = DetachOutcome {
            pci_device,
            chardev,
            storage,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome.verdict() {
            Verdict::Deleted => {
                tracing::info!(device_id = %device_id, elapsed_ms, "virtio-blk device detached");
                Ok(())
            }
            Verdict::PartiallyDeleted => {
                tracing::error!(
                    device_id = %device_id,
                    elapsed_ms,
                    succeeded = outcome.succeeded(),
                    %outcome,
                    "virtio-blk device partially detached"
                );
                Err(KvmError::DevicePartiallyDeleted(outcome))
            }
            Verdict::NotDeleted => {
                tracing::error!(
                    device_id = %device_id,
                    elapsed_ms,
                    %outcome,
                    "virtio-blk device not detached"
                );
                Err(KvmError::DeviceNotDeleted(outcome))
            }
        }
    }

    async fn connect(&self, budget: &Budget) -> Result<Monitor> {
        Monitor::connect(
            &self.config.qmp_address,
            budget.cap(self.config.command_timeout),
        )
        .await
        .map_err(|e| {
            tracing::error!(
                qmp_address = %self.config.qmp_address.display(),
                error = %e,
                "Failed to create QMP monitor"
            );
            KvmError::MonitorCreation(e)
        })
    }

    /// Monitor half of attach: chardev, then PCI device.
    async fn plug(&self, monitor: &mut Monitor, device: &VirtioBlk, budget: &Budget) -> Result<()> {
        let chardev_id = naming::chardev_id(&device.id);
        let socket_path = naming::chardev_socket_path(&self.config.ctrlr_dir, &device.id);

        monitor
            .execute_within(
                "chardev-add",
                Some(chardev_add_args(&chardev_id, &socket_path)),
                budget.cap(self.config.command_timeout),
            )
            .await
            .map_err(|e| {
                tracing::error!(device_id = %device.id, error = %e, "chardev-add failed");
                KvmError::ChardevAttach(e)
            })?;
        tracing::debug!(
            device_id = %device.id,
            socket_path = %socket_path.display(),
            "Chardev added"
        );

        if let Err(e) = monitor
            .execute_within(
                "device_add",
                Some(device_add_args(device, &chardev_id)),
                budget.cap(self.config.command_timeout),
            )
            .await
        {
            tracing::error!(
                device_id = %device.id,
                error = %e,
                "device_add failed, removing chardev"
            );
            if let Err(rollback) = monitor
                .execute_within(
                    "chardev-remove",
                    Some(json!({ "id": chardev_id })),
                    budget.cap(self.config.command_timeout),
                )
                .await
            {
                tracing::warn!(
                    device_id = %device.id,
                    error = %rollback,
                    "Chardev rollback failed"
                );
            }
            return Err(KvmError::PciDeviceAttach(e));
        }
        tracing::debug!(device_id = %device.id, "PCI device added");
        Ok(())
    }

    /// `device_del` counts only once the guest has released the device.
    async fn unplug(
        &self,
        monitor: &mut Monitor,
        device_id: &str,
        budget: &Budget,
    ) -> std::result::Result<(), QmpError> {
        monitor
            .execute_within(
                "device_del",
                Some(json!({ "id": device_id })),
                budget.cap(self.config.command_timeout),
            )
            .await?;
        tracing::debug!(device_id = %device_id, "device_del accepted, waiting for confirmation");

        let event = monitor
            .wait_for_event(
                DEVICE_DELETED_EVENT,
                |e| e.data_str("device") == Some(device_id),
                budget.cap(self.config.operation_timeout),
            )
            .await?;
        tracing::debug!(
            device_id = %device_id,
            at = ?event.timestamp.to_datetime(),
            "PCI device removal confirmed"
        );
        Ok(())
    }
}

fn ensure_valid_id(device_id: &str) -> Result<()> {
    if naming::is_valid_device_id(device_id) {
        Ok(())
    } else {
        Err(KvmError::InvalidDeviceId(device_id.to_string()))
    }
}

fn chardev_add_args(chardev_id: &str, socket_path: &Path) -> Value {
    json!({
        "id": chardev_id,
        "backend": {
            "type": "socket",
            "data": {
                "addr": {
                    "type": "unix",
                    "data": { "path": socket_path.to_string_lossy() },
                },
                "server": false,
            },
        },
    })
}

fn device_add_args(device: &VirtioBlk, chardev_id: &str) -> Value {
    let mut args = json!({
        "driver": VIRTIO_BLK_DRIVER,
        "id": device.id,
        "chardev": chardev_id,
    });
    if device.max_io_qps > 0 {
        args["num-queues"] = json!(device.max_io_qps);
    }
    args
}
