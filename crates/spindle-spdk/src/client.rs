//! JSON-RPC 2.0 client for the SPDK RPC socket.

use crate::error::{Result, SpdkError};
use crate::rpc::JsonRpc;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default timeout for a single RPC call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Read chunk size for responses.
const READ_CHUNK: usize = 4096;

/// Client for the storage engine's Unix RPC socket.
///
/// The socket is opened lazily on the first call and reused afterwards.
/// Calls are serialized. A call that fails in transport or is cancelled
/// mid-flight discards the connection and the next call reconnects.
pub struct SpdkClient {
    socket_path: PathBuf,
    rpc_timeout: Duration,
    next_id: AtomicU64,
    conn: Mutex<Option<Connection>>,
}

struct Connection {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl SpdkClient {
    /// Create a client for the RPC socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    /// Path of the RPC socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> Result<Connection> {
        tracing::debug!(path = %self.socket_path.display(), "Connecting to storage engine");
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| SpdkError::Connection(format!("socket connect failed: {e}")))?;
        Ok(Connection {
            stream,
            buf: Vec::with_capacity(READ_CHUNK),
        })
    }

    /// One request/response exchange. The connection is held locally while
    /// the request is in flight and returned to `slot` only once an id-matched
    /// response has been read, so a dropped call never leaves a stale reply
    /// queued for the next one.
    async fn call_on(
        &self,
        slot: &mut Option<Connection>,
        id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        let mut request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if !params.is_null() {
            request["params"] = params;
        }
        let request_str = serde_json::to_string(&request)?;
        tracing::trace!(request = %request_str, "RPC request body");

        conn.stream.write_all(request_str.as_bytes()).await?;
        conn.stream.flush().await?;

        let response = conn.read_value().await?;
        tracing::trace!(response = %response, "RPC response body");

        match response.get("id").and_then(Value::as_u64) {
            Some(got) if got == id => {}
            other => {
                return Err(SpdkError::Protocol(format!(
                    "response id {other:?} does not match request id {id}"
                )))
            }
        }
        *slot = Some(conn);

        if let Some(error) = response.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_i64)
                .map_or(-1, |code| i32::try_from(code).unwrap_or(i32::MIN));
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            tracing::debug!(
                method = %method,
                id,
                code,
                message = %message,
                "RPC error response"
            );
            return Err(SpdkError::Rpc { code, message });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| SpdkError::Protocol("missing result in response".into()))
    }
}

impl Connection {
    /// Read one complete JSON value. Responses are not newline-delimited, so
    /// bytes are accumulated until the stream deserializer sees a full value.
    async fn read_value(&mut self) -> Result<Value> {
        loop {
            let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = values.byte_offset();
                    self.buf.drain(..consumed);
                    return Ok(value);
                }
                Some(Err(e)) if !e.is_eof() => return Err(e.into()),
                _ => {}
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(SpdkError::Connection("connection closed by peer".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl JsonRpc for SpdkClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method = %method, id, "Sending RPC request");

        let mut slot = self.conn.lock().await;
        let call = self.call_on(&mut slot, id, method, params);
        let outcome = match timeout(self.rpc_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    method = %method,
                    id,
                    timeout_secs = self.rpc_timeout.as_secs(),
                    "RPC response timeout"
                );
                Err(SpdkError::Timeout(self.rpc_timeout))
            }
        };

        match &outcome {
            Ok(_) => tracing::debug!(method = %method, id, "RPC call successful"),
            Err(e) if e.is_transport() => {
                tracing::debug!(
                    method = %method,
                    id,
                    error = %e,
                    "Storage engine connection dropped"
                );
            }
            Err(_) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::UnixListener;

    /// Serve one connection, answering each request via `respond`. Responses
    /// are written in two pieces without a trailing newline.
    fn serve<F>(listener: UnixListener, mut respond: F) -> tokio::task::JoinHandle<Vec<Value>>
    where
        F: FnMut(&Value) -> Value + Send + 'static,
    {
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = Vec::new();
            loop {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let mut values = serde_json::Deserializer::from_slice(&buf).into_iter::<Value>();
                if let Some(Ok(request)) = values.next() {
                    let consumed = values.byte_offset();
                    buf.drain(..consumed);
                    let body = serde_json::to_vec(&respond(&request)).unwrap();
                    let (head, tail) = body.split_at(body.len() / 2);
                    stream.write_all(head).await.unwrap();
                    stream.flush().await.unwrap();
                    stream.write_all(tail).await.unwrap();
                    seen.push(request);
                }
            }
            seen
        })
    }

    fn listener() -> (tempfile::TempDir, PathBuf, UnixListener) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spdk.sock");
        let listener = UnixListener::bind(&path).unwrap();
        (dir, path, listener)
    }

    #[tokio::test]
    async fn test_call_returns_result() {
        let (_dir, path, listener) = listener();
        let server = serve(listener, |req| {
            json!({"jsonrpc": "2.0", "id": req["id"], "result": true})
        });

        let client = SpdkClient::new(&path);
        let first = client
            .call("vhost_delete_controller", json!({"ctrlr": "a"}))
            .await
            .unwrap();
        let second = client.call("spdk_get_version", Value::Null).await.unwrap();
        assert_eq!(first, json!(true));
        assert_eq!(second, json!(true));
        drop(client);

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["method"], "vhost_delete_controller");
        assert_eq!(seen[0]["params"]["ctrlr"], "a");
        assert!(seen[1].get("params").is_none());
        assert_ne!(seen[0]["id"], seen[1]["id"]);
    }

    #[tokio::test]
    async fn test_call_surfaces_rpc_error() {
        let (_dir, path, listener) = listener();
        let _server = serve(listener, |req| {
            json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": -32602, "message": "Invalid parameters"}
            })
        });

        let client = SpdkClient::new(&path);
        let err = client
            .call("vhost_create_blk_controller", json!({}))
            .await
            .unwrap_err();
        match err {
            SpdkError::Rpc { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Invalid parameters");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_mismatched_id_is_protocol_error() {
        let (_dir, path, listener) = listener();
        let _server = serve(listener, |_| json!({"jsonrpc": "2.0", "id": 999, "result": true}));

        let client = SpdkClient::new(&path);
        let err = client
            .call("vhost_delete_controller", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SpdkError::Protocol(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = SpdkClient::new(dir.path().join("absent.sock"));
        let err = client.call("spdk_get_version", Value::Null).await.unwrap_err();
        assert!(matches!(err, SpdkError::Connection(_)));
    }

    #[tokio::test]
    async fn test_silent_engine_times_out() {
        let (_dir, path, listener) = listener();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = SpdkClient::new(&path).with_timeout(Duration::from_millis(50));
        let err = client.call("spdk_get_version", Value::Null).await.unwrap_err();
        assert!(matches!(err, SpdkError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_error_code_saturates() {
        let (_dir, path, listener) = listener();
        let _server = serve(listener, |req| {
            json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "error": {"code": 1_i64 << 40, "message": "odd"}
            })
        });

        let client = SpdkClient::new(&path);
        let err = client
            .call("vhost_delete_controller", json!({"ctrlr": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SpdkError::Rpc { code: i32::MIN, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_poison_next_call() {
        let (_dir, path, listener) = listener();
        // Every connection answers request id 1 late and the rest at once.
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    loop {
                        let mut chunk = [0u8; 1024];
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        let mut values =
                            serde_json::Deserializer::from_slice(&buf).into_iter::<Value>();
                        let Some(Ok(request)) = values.next() else {
                            continue;
                        };
                        let consumed = values.byte_offset();
                        buf.drain(..consumed);
                        if request["id"] == 1 {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                        let body = json!({"jsonrpc": "2.0", "id": request["id"], "result": true});
                        if stream.write_all(body.to_string().as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let client = SpdkClient::new(&path);
        let cancelled = timeout(
            Duration::from_millis(50),
            client.call("vhost_delete_controller", json!({"ctrlr": "a"})),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let result = client
            .call("vhost_delete_controller", json!({"ctrlr": "b"}))
            .await
            .unwrap();
        assert_eq!(result, json!(true));
    }
}
