//! Shared fixtures: a scripted QMP monitor and a stub storage engine.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use spindle_core::KvmConfig;
use spindle_spdk::{JsonRpc, SpdkError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

pub const DEVICE_ID: &str = "virtio-blk-42";
pub const VOLUME_ID: &str = "Malloc42";

pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(250);
pub const OPERATION_TIMEOUT: Duration = Duration::from_millis(300);

const GREETING: &str =
    r#"{"QMP":{"version":{"qemu":{"micro":50,"minor":0,"major":7},"package":""},"capabilities":[]}}"#;
const QMP_OK: &str = r#"{"return": {}}"#;
const QMP_ERROR: &str = r#"{"error": {"class": "GenericError", "desc": "some error"}}"#;

/// How long the mock waits for the client to connect or send.
const SERVER_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
struct MockCall {
    response: String,
    event: Option<String>,
    expected_args: Vec<String>,
}

/// Builder for a scripted QMP monitor.
pub struct MockMonitor {
    dir: TempDir,
    socket_path: PathBuf,
    calls: Vec<MockCall>,
    handshake_delay: Duration,
}

impl MockMonitor {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("spindle-kvm-test")
            .tempdir()
            .expect("create test dir");
        let socket_path = dir.path().join("qmp.sock");
        Self {
            dir,
            socket_path,
            calls: Vec::new(),
            handshake_delay: Duration::ZERO,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> KvmConfig {
        KvmConfig::builder()
            .qmp_address(&self.socket_path)
            .ctrlr_dir(self.dir.path())
            .command_timeout(COMMAND_TIMEOUT)
            .operation_timeout(OPERATION_TIMEOUT)
            .build()
            .expect("valid test config")
    }

    pub fn expect_add_chardev(mut self, id: &str) -> Self {
        let path = self.dir.path().join(id);
        self.calls.push(MockCall {
            response: r#"{"return": {"pty": "/tmp/dev/pty/42"}}"#.into(),
            event: None,
            expected_args: vec![
                r#""execute":"chardev-add""#.into(),
                format!(r#""id":"{id}""#),
                format!(r#""path":"{}""#, path.display()),
            ],
        });
        self
    }

    pub fn expect_add_virtio_blk(mut self, id: &str, chardev_id: &str) -> Self {
        self.calls.push(MockCall {
            response: QMP_OK.into(),
            event: None,
            expected_args: vec![
                r#""execute":"device_add""#.into(),
                r#""driver":"vhost-user-blk-pci""#.into(),
                format!(r#""id":"{id}""#),
                format!(r#""chardev":"{chardev_id}""#),
            ],
        });
        self
    }

    pub fn expect_delete_chardev(mut self, id: &str) -> Self {
        self.calls.push(MockCall {
            response: QMP_OK.into(),
            event: None,
            expected_args: vec![
                r#""execute":"chardev-remove""#.into(),
                format!(r#""id":"{id}""#),
            ],
        });
        self
    }

    pub fn expect_delete_virtio_blk(mut self, id: &str) -> Self {
        self.calls.push(MockCall {
            response: QMP_OK.into(),
            event: None,
            expected_args: vec![
                r#""execute":"device_del""#.into(),
                format!(r#""id":"{id}""#),
            ],
        });
        self
    }

    pub fn expect_delete_virtio_blk_with_event(self, id: &str) -> Self {
        self.expect_delete_virtio_blk_with_event_for(id, id)
    }

    /// `device_del` for `id` followed by a `DEVICE_DELETED` naming `event_device`.
    pub fn expect_delete_virtio_blk_with_event_for(mut self, id: &str, event_device: &str) -> Self {
        self = self.expect_delete_virtio_blk(id);
        if let Some(last) = self.calls.last_mut() {
            last.event = Some(format!(
                r#"{{"event":"DEVICE_DELETED","data":{{"path":"/some/path","device":"{event_device}"}},"timestamp":{{"seconds":1,"microseconds":2}}}}"#
            ));
        }
        self
    }

    /// Answer the most recently added call with an error reply.
    pub fn with_error_response(mut self) -> Self {
        let last = self
            .calls
            .last_mut()
            .expect("no call to attach a QMP error to");
        last.response = QMP_ERROR.into();
        last.event = None;
        self
    }

    /// Hold back both the greeting and the negotiation reply by `delay`.
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.handshake_delay = delay;
        self
    }

    /// Bind the socket and start serving one connection.
    pub fn start(self) -> RunningMonitor {
        let listener = UnixListener::bind(&self.socket_path).expect("bind mock monitor socket");
        let handle = tokio::spawn(serve(listener, self.calls, self.handshake_delay));
        RunningMonitor {
            _dir: self.dir,
            handle,
        }
    }
}

/// A mock monitor serving in the background.
pub struct RunningMonitor {
    _dir: TempDir,
    handle: JoinHandle<Transcript>,
}

impl RunningMonitor {
    /// Wait for the session to end and return what the client sent.
    pub async fn finish(self) -> Transcript {
        self.handle.await.expect("mock monitor task panicked")
    }
}

/// Everything the client sent during one session.
#[derive(Debug, Default)]
pub struct Transcript {
    /// Whether a client connected at all.
    pub connected: bool,
    /// Every command line received, in order, negotiation included.
    pub commands: Vec<String>,
    /// Scripted calls that were performed.
    pub performed: usize,
    /// Number of scripted calls.
    pub expected: usize,
    /// Expected arguments missing from received commands.
    pub mismatches: Vec<String>,
    /// Commands received after the script ran out.
    pub unexpected: Vec<String>,
}

impl Transcript {
    /// The `execute` names of all received commands.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|line| {
                serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v["execute"].as_str().map(str::to_string))
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn assert_expected_calls_performed(&self) {
        assert!(
            self.mismatches.is_empty(),
            "argument mismatches: {:#?}",
            self.mismatches
        );
        assert!(
            self.unexpected.is_empty(),
            "unexpected commands: {:#?}",
            self.unexpected
        );
        assert_eq!(
            self.performed, self.expected,
            "not all expected calls were performed: {:#?}",
            self.commands
        );
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
    let mut line = String::new();
    match tokio::time::timeout(SERVER_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line.trim().to_string()),
        _ => None,
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, data: &str) {
    let _ = writer.write_all(format!("{data}\n").as_bytes()).await;
}

async fn serve(
    listener: UnixListener,
    calls: Vec<MockCall>,
    handshake_delay: Duration,
) -> Transcript {
    let mut transcript = Transcript {
        expected: calls.len(),
        ..Default::default()
    };

    let Ok(Ok((stream, _))) = tokio::time::timeout(SERVER_TIMEOUT, listener.accept()).await else {
        return transcript;
    };
    transcript.connected = true;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tokio::time::sleep(handshake_delay).await;
    write_line(&mut writer, GREETING).await;
    let Some(negotiation) = read_line(&mut reader).await else {
        return transcript;
    };
    if !negotiation.contains(r#""execute":"qmp_capabilities""#) {
        transcript
            .mismatches
            .push(format!("expected capabilities negotiation, got {negotiation}"));
    }
    transcript.commands.push(negotiation);
    tokio::time::sleep(handshake_delay).await;
    write_line(&mut writer, QMP_OK).await;

    for call in calls {
        let Some(request) = read_line(&mut reader).await else {
            return transcript;
        };
        for arg in &call.expected_args {
            if !request.contains(arg.as_str()) {
                transcript
                    .mismatches
                    .push(format!("expected to find argument {arg} in {request}"));
            }
        }
        transcript.commands.push(request);
        transcript.performed += 1;

        write_line(&mut writer, &call.response).await;
        if let Some(event) = &call.event {
            tokio::time::sleep(Duration::from_millis(1)).await;
            write_line(&mut writer, event).await;
        }
    }

    while let Some(extra) = read_line(&mut reader).await {
        transcript.commands.push(extra.clone());
        transcript.unexpected.push(extra);
    }
    transcript
}

/// Storage engine stub answering the vhost methods.
pub struct StubRpc {
    result: Result<Value, String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl StubRpc {
    pub fn succeeding() -> Arc<Self> {
        Self::with(Ok(json!(true)))
    }

    pub fn failing() -> Arc<Self> {
        Self::with(Err("stub error".into()))
    }

    /// Calls go through but report a negative result.
    pub fn negative() -> Arc<Self> {
        Self::with(Ok(json!(false)))
    }

    fn with(result: Result<Value, String>) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }

    pub fn params(&self) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl JsonRpc for StubRpc {
    async fn call(&self, method: &str, params: Value) -> spindle_spdk::Result<Value> {
        self.calls.lock().unwrap().push((method.to_string(), params));
        match &self.result {
            Ok(value) => Ok(value.clone()),
            Err(message) => Err(SpdkError::Rpc {
                code: -1,
                message: message.clone(),
            }),
        }
    }
}
