//! vhost controller calls.

use crate::error::{Result, SpdkError};
use crate::rpc::JsonRpc;
use serde::Serialize;

/// Creates a vhost-user block controller exposing a bdev.
pub const VHOST_CREATE_BLK_CONTROLLER: &str = "vhost_create_blk_controller";

/// Deletes a vhost controller of any type.
pub const VHOST_DELETE_CONTROLLER: &str = "vhost_delete_controller";

/// Parameters of [`VHOST_CREATE_BLK_CONTROLLER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VhostCreateBlkControllerParams {
    /// Controller name, also the name of the vhost-user socket file.
    pub ctrlr: String,
    /// Name of the bdev to expose.
    pub dev_name: String,
}

/// Parameters of [`VHOST_DELETE_CONTROLLER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VhostDeleteControllerParams {
    /// Controller name.
    pub ctrlr: String,
}

/// Create a vhost-user block controller.
pub async fn create_blk_controller(
    rpc: &dyn JsonRpc,
    params: &VhostCreateBlkControllerParams,
) -> Result<()> {
    tracing::debug!(
        ctrlr = %params.ctrlr,
        dev_name = %params.dev_name,
        "Creating vhost blk controller"
    );
    call_expecting_true(rpc, VHOST_CREATE_BLK_CONTROLLER, params).await
}

/// Delete a vhost controller.
pub async fn delete_controller(
    rpc: &dyn JsonRpc,
    params: &VhostDeleteControllerParams,
) -> Result<()> {
    tracing::debug!(ctrlr = %params.ctrlr, "Deleting vhost controller");
    call_expecting_true(rpc, VHOST_DELETE_CONTROLLER, params).await
}

/// Both vhost methods answer `true` on success.
async fn call_expecting_true<P: Serialize>(
    rpc: &dyn JsonRpc,
    method: &str,
    params: &P,
) -> Result<()> {
    let result = rpc.call(method, serde_json::to_value(params)?).await?;
    if result.as_bool() != Some(true) {
        tracing::warn!(method = %method, result = %result, "Unexpected storage engine result");
        return Err(SpdkError::UnexpectedResult {
            method: method.to_string(),
        });
    }
    Ok(())
}
