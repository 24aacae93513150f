//! QMP monitor client.
//!
//! A [`Monitor`] owns one Unix socket connection. The read half is handed to
//! a background dispatch task that classifies every inbound frame and routes
//! it to one of two channels: command replies, consumed by
//! [`Monitor::execute`], and event notifications, consumed by
//! [`Monitor::wait_for_event`]. Events that arrive while a command is in
//! flight are queued until someone waits for them.

use crate::error::{QmpError, Result};
use crate::protocol::{Command, Event, Frame, Greeting, Reply, CAPABILITIES_NEGOTIATION};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Client for a QMP monitor socket.
///
/// Only one command is outstanding at a time; `execute` takes `&mut self`.
pub struct Monitor {
    writer: BufWriter<OwnedWriteHalf>,
    replies: mpsc::UnboundedReceiver<Result<Reply>>,
    events: mpsc::UnboundedReceiver<Event>,
    dispatcher: JoinHandle<()>,
    greeting: Greeting,
    timeout: Duration,
    next_id: u64,
}

impl Monitor {
    /// Connect to a monitor socket and leave capabilities negotiation mode.
    ///
    /// Reads the greeting, sends `qmp_capabilities` and waits for its reply.
    /// `timeout` bounds the whole handshake: socket connect, greeting and the
    /// negotiation round-trip share one deadline. It also becomes the default
    /// timeout for [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// Returns [`QmpError::Connect`] if the socket cannot be reached, or a
    /// handshake error if the peer does not speak QMP.
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self> {
        let start = std::time::Instant::now();
        let deadline = Instant::now() + timeout;
        tracing::debug!(path = %path.display(), "Connecting to monitor");

        let stream = match time::timeout_at(deadline, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Monitor socket connect failed"
                );
                return Err(QmpError::Connect(e));
            }
            Err(_) => return Err(QmpError::Timeout(timeout)),
        };

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let line = match time::timeout_at(deadline, read_frame(&mut reader)).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err(QmpError::Handshake("closed before greeting".into())),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(QmpError::Timeout(timeout)),
        };
        let greeting = match Frame::parse(&line)? {
            Frame::Greeting(greeting) => greeting,
            other => {
                return Err(QmpError::Handshake(format!(
                    "expected greeting, got {other:?}"
                )))
            }
        };
        tracing::debug!(version = %greeting.qmp.version, "Monitor greeting received");

        let (reply_tx, replies) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(reader, reply_tx, event_tx));

        let mut monitor = Self {
            writer: BufWriter::new(write_half),
            replies,
            events,
            dispatcher,
            greeting,
            timeout,
            next_id: 1,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        monitor
            .execute_within(CAPABILITIES_NEGOTIATION, None, remaining)
            .await
            .map_err(|e| match e {
                QmpError::Command { class, desc, .. } => QmpError::Handshake(format!(
                    "capabilities negotiation rejected: {class}: {desc}"
                )),
                QmpError::Timeout(_) => QmpError::Timeout(timeout),
                other => other,
            })?;

        tracing::debug!(
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Monitor ready"
        );
        Ok(monitor)
    }

    /// Greeting the monitor sent on connect.
    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    /// Default per-command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a command using the default timeout.
    pub async fn execute(&mut self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let timeout = self.timeout;
        self.execute_within(command, arguments, timeout).await
    }

    /// Execute a command and wait up to `timeout` for its reply.
    ///
    /// Returns the `return` payload. An `error` reply becomes
    /// [`QmpError::Command`]; everything else is a transport failure.
    pub async fn execute_within(
        &mut self,
        command: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let deadline = Instant::now() + timeout;

        let frame = serde_json::to_string(&Command {
            execute: command,
            arguments: arguments.as_ref(),
            id,
        })?;
        tracing::debug!(command = %command, id, "Sending monitor command");
        tracing::trace!(frame = %frame, "Monitor command frame");

        match time::timeout_at(deadline, self.send(&frame)).await {
            Ok(result) => result?,
            Err(_) => return Err(QmpError::Timeout(timeout)),
        }

        loop {
            let reply = match time::timeout_at(deadline, self.replies.recv()).await {
                Ok(Some(reply)) => reply?,
                Ok(None) => return Err(QmpError::Closed),
                Err(_) => {
                    tracing::warn!(
                        command = %command,
                        id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Monitor reply timeout"
                    );
                    return Err(QmpError::Timeout(timeout));
                }
            };

            // A reply to an earlier command that timed out.
            if matches!(reply.id, Some(reply_id) if reply_id != id) {
                tracing::debug!(
                    command = %command,
                    id,
                    stale_id = ?reply.id,
                    "Discarding stale reply"
                );
                continue;
            }

            return match reply.outcome {
                Ok(value) => {
                    tracing::debug!(command = %command, id, "Monitor command succeeded");
                    Ok(value)
                }
                Err(err) => {
                    tracing::debug!(
                        command = %command,
                        id,
                        class = %err.class,
                        desc = %err.desc,
                        "Monitor command rejected"
                    );
                    Err(QmpError::Command {
                        command: command.to_string(),
                        class: err.class,
                        desc: err.desc,
                    })
                }
            };
        }
    }

    /// Wait for an event named `name` that satisfies `predicate`.
    ///
    /// Events already queued are considered first. Events that do not match
    /// are dropped.
    pub async fn wait_for_event<F>(
        &mut self,
        name: &str,
        mut predicate: F,
        timeout: Duration,
    ) -> Result<Event>
    where
        F: FnMut(&Event) -> bool,
    {
        let deadline = Instant::now() + timeout;
        tracing::debug!(
            event = %name,
            timeout_ms = timeout.as_millis() as u64,
            "Waiting for monitor event"
        );

        loop {
            match time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if event.event == name && predicate(&event) => {
                    tracing::debug!(event = %name, data = %event.data, "Monitor event observed");
                    return Ok(event);
                }
                Ok(Some(event)) => {
                    tracing::trace!(
                        event = %event.event,
                        data = %event.data,
                        "Ignoring unrelated event"
                    );
                }
                Ok(None) => return Err(QmpError::Closed),
                Err(_) => {
                    tracing::debug!(event = %name, "Monitor event wait timed out");
                    return Err(QmpError::Timeout(timeout));
                }
            }
        }
    }

    /// Close the connection.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::trace!(error = %e, "Monitor socket shutdown failed");
        }
        self.dispatcher.abort();
    }

    async fn send(&mut self, frame: &str) -> Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Read the next non-empty line. `None` on EOF.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<String>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            tracing::trace!(frame = %trimmed, "Monitor frame received");
            return Ok(Some(trimmed.to_string()));
        }
    }
}

/// Classify inbound frames until EOF or a connection-level error.
///
/// Connection-level errors are forwarded to the reply channel so that the
/// pending or next `execute` fails with them.
async fn dispatch_loop(
    mut reader: BufReader<OwnedReadHalf>,
    replies: mpsc::UnboundedSender<Result<Reply>>,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        let line = match read_frame(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Monitor closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Monitor read failed");
                let _ = replies.send(Err(e));
                break;
            }
        };

        match Frame::parse(&line) {
            Ok(Frame::Reply(reply)) => {
                if replies.send(Ok(reply)).is_err() {
                    break;
                }
            }
            Ok(Frame::Event(event)) => {
                tracing::debug!(event = %event.event, "Monitor event queued");
                let _ = events.send(event);
            }
            Ok(Frame::Greeting(_)) => {
                tracing::warn!("Ignoring unexpected second greeting");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed monitor frame");
                let _ = replies.send(Err(e));
                break;
            }
        }
    }
}
