//! The storage engine call capability.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A JSON-RPC endpoint of the storage engine.
///
/// Implementations own framing and id correlation; callers only see
/// `method` + `params` in and `result` or an error out. This is the seam
/// tests use to stub out the engine.
#[async_trait]
pub trait JsonRpc: Send + Sync {
    /// Invoke `method` with `params` and return the `result` member.
    ///
    /// # Errors
    ///
    /// Returns an error if the call could not be delivered, timed out, or
    /// the engine answered with a JSON-RPC error object.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

#[async_trait]
impl<T: JsonRpc + ?Sized> JsonRpc for Arc<T> {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        (**self).call(method, params).await
    }
}
