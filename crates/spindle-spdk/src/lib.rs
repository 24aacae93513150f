//! # spindle-spdk
//!
//! Storage engine side of spindle: the [`JsonRpc`] call capability, the
//! vhost controller methods the device orchestrator needs, and
//! [`SpdkClient`], a JSON-RPC 2.0 client for the SPDK Unix RPC socket.
//!
//! ```no_run
//! use spindle_spdk::{vhost, SpdkClient, VhostCreateBlkControllerParams};
//!
//! # async fn example() -> spindle_spdk::Result<()> {
//! let client = SpdkClient::new("/var/tmp/spdk.sock");
//! vhost::create_blk_controller(
//!     &client,
//!     &VhostCreateBlkControllerParams {
//!         ctrlr: "virtio-blk-42".into(),
//!         dev_name: "Malloc42".into(),
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod rpc;
pub mod vhost;

pub use client::{SpdkClient, DEFAULT_RPC_TIMEOUT};
pub use error::{Result, SpdkError};
pub use rpc::JsonRpc;
pub use vhost::{VhostCreateBlkControllerParams, VhostDeleteControllerParams};
