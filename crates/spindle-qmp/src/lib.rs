//! # spindle-qmp
//!
//! Client for the QEMU Machine Protocol (QMP), the JSON control channel a
//! running virtual machine exposes for runtime reconfiguration such as
//! device hotplug.
//!
//! ## Protocol
//!
//! ```text
//! monitor                              client
//!   │  {"QMP": {"version": ...}}          │
//!   │ ──────────────────────────────────▶ │
//!   │  {"execute": "qmp_capabilities"}    │
//!   │ ◀────────────────────────────────── │
//!   │  {"return": {}}                     │
//!   │ ──────────────────────────────────▶ │
//!   │  {"execute": "device_del", ...}     │
//!   │ ◀────────────────────────────────── │
//!   │  {"return": {}}                     │  ─▶ reply channel
//!   │  {"event": "DEVICE_DELETED", ...}   │  ─▶ event channel
//!   │ ──────────────────────────────────▶ │
//! ```
//!
//! A background task owns the read half of the socket and demultiplexes
//! replies from events, so an event can be awaited after the command that
//! triggered it has already returned.
//!
//! ## Quick Start
//!
//! ```no_run
//! use spindle_qmp::Monitor;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn example() -> spindle_qmp::Result<()> {
//! let mut monitor = Monitor::connect(Path::new("/var/run/qmp.sock"), Duration::from_secs(2)).await?;
//! monitor
//!     .execute("device_del", Some(serde_json::json!({ "id": "blk0" })))
//!     .await?;
//! monitor
//!     .wait_for_event(
//!         "DEVICE_DELETED",
//!         |e| e.data_str("device") == Some("blk0"),
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//! monitor.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod monitor;
mod protocol;

pub use error::{QmpError, Result};
pub use monitor::Monitor;
pub use protocol::{
    Command, ErrorDesc, Event, Frame, Greeting, GreetingBody, Reply, Timestamp, Version,
    VersionTriple, CAPABILITIES_NEGOTIATION,
};
