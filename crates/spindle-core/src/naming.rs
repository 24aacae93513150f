//! Monitor-side names derived from a device id.
//!
//! Everything here is a pure function of its inputs so detach can always
//! recompute what attach used without keeping state.

use std::path::{Path, PathBuf};

/// Chardev id for a device. The chardev shares the device's id.
pub fn chardev_id(device_id: &str) -> String {
    device_id.to_string()
}

/// Path of the vhost-user socket backing a device's chardev.
pub fn chardev_socket_path(ctrlr_dir: &Path, device_id: &str) -> PathBuf {
    ctrlr_dir.join(device_id)
}

/// Whether `device_id` can be used as a single path component under the
/// controller directory.
pub fn is_valid_device_id(device_id: &str) -> bool {
    !device_id.is_empty()
        && device_id != "."
        && device_id != ".."
        && device_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
