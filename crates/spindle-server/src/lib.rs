//! # spindle-server
//!
//! HTTP API that attaches and detaches SPDK-backed virtio-blk devices on a
//! running QEMU guest.
//!
//! The server keeps an in-memory record of attached devices and delegates
//! the work to [`spindle_core::DeviceOrchestrator`]. Operations on the same
//! device id are serialized; a second request for a busy id gets `409`.

pub mod config;
pub mod error;
pub mod http;
pub mod registry;

pub use config::ServerConfig;
pub use error::ApiError;
pub use http::{build_router, serve, AppState};
pub use registry::VirtioBlkRegistry;
