//! virtio-blk device representation.

use serde::{Deserialize, Serialize};

/// PCI placement of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciEndpoint {
    pub physical_function: u32,
    #[serde(default)]
    pub virtual_function: u32,
    #[serde(default)]
    pub port_id: u32,
}

/// A virtio-blk device backed by a storage engine volume.
///
/// The `id` names the storage engine controller, the monitor chardev and the
/// monitor PCI device object alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtioBlk {
    /// Resource id.
    pub id: String,
    /// PCI placement.
    #[serde(default)]
    pub pcie_id: PciEndpoint,
    /// Backing volume (bdev) name.
    pub volume_id: String,
    /// Number of I/O queue pairs; 0 leaves the hypervisor default.
    #[serde(default)]
    pub max_io_qps: u32,
}
