//! In-memory registry of attached virtio-blk devices.

use spindle_core::VirtioBlk;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Attached devices keyed by id, plus ids with an operation in flight.
///
/// The orchestrator expects the caller to serialize operations on one id;
/// [`try_reserve`](Self::try_reserve) provides that.
#[derive(Debug, Default)]
pub struct VirtioBlkRegistry {
    devices: RwLock<HashMap<String, VirtioBlk>>,
    busy: Mutex<HashSet<String>>,
}

impl VirtioBlkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a device.
    pub async fn get(&self, id: &str) -> Option<VirtioBlk> {
        self.devices.read().await.get(id).cloned()
    }

    /// Whether a device is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.contains_key(id)
    }

    /// All devices, ordered by id.
    pub async fn list(&self) -> Vec<VirtioBlk> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Whether no device is registered.
    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Register a device, replacing any previous record with the same id.
    pub async fn insert(&self, device: VirtioBlk) {
        tracing::debug!(device_id = %device.id, "Device registered");
        self.devices.write().await.insert(device.id.clone(), device);
    }

    /// Unregister a device.
    pub async fn remove(&self, id: &str) -> Option<VirtioBlk> {
        let removed = self.devices.write().await.remove(id);
        if removed.is_some() {
            tracing::debug!(device_id = %id, "Device unregistered");
        }
        removed
    }

    /// Claim `id` for one operation. `None` if another operation holds it.
    ///
    /// The claim is released when the returned guard drops.
    pub fn try_reserve(&self, id: &str) -> Option<Reservation<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(id.to_string()) {
            return None;
        }
        Some(Reservation {
            busy: &self.busy,
            id: id.to_string(),
        })
    }
}

/// Exclusive claim on a device id.
#[derive(Debug)]
pub struct Reservation<'a> {
    busy: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}
