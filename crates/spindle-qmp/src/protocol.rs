//! QMP wire types.
//!
//! QMP is newline-delimited JSON. Every inbound frame is one of:
//!
//! - a greeting, sent once by the monitor right after accept
//! - a reply to the single outstanding command (`return` or `error`)
//! - an asynchronous event notification (`event`)

use crate::error::{QmpError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Command that leaves capabilities negotiation mode.
pub const CAPABILITIES_NEGOTIATION: &str = "qmp_capabilities";

/// Outbound command frame.
#[derive(Debug, Serialize)]
pub struct Command<'a> {
    /// Command name.
    pub execute: &'a str,
    /// Command arguments, omitted when the command takes none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<&'a Value>,
    /// Transaction id echoed back by the monitor in the reply.
    pub id: u64,
}

/// Greeting sent by the monitor on accept.
#[derive(Debug, Clone, Deserialize)]
pub struct Greeting {
    /// Greeting body.
    #[serde(rename = "QMP")]
    pub qmp: GreetingBody,
}

/// Contents of the greeting.
#[derive(Debug, Clone, Deserialize)]
pub struct GreetingBody {
    /// Monitor version.
    pub version: Version,
    /// Capabilities the monitor offers for negotiation.
    #[serde(default)]
    pub capabilities: Vec<Value>,
}

/// Monitor version as reported in the greeting.
#[derive(Debug, Clone, Deserialize)]
pub struct Version {
    /// Upstream version triple.
    pub qemu: VersionTriple,
    /// Downstream package string, often empty.
    #[serde(default)]
    pub package: String,
}

/// `major.minor.micro` version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.qemu.major, self.qemu.minor, self.qemu.micro
        )?;
        if !self.package.is_empty() {
            write!(f, " ({})", self.package)?;
        }
        Ok(())
    }
}

/// Error body of a rejected command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDesc {
    /// Error class, e.g. `GenericError` or `DeviceNotFound`.
    pub class: String,
    /// Human readable description.
    pub desc: String,
}

/// Reply to a command.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Echoed transaction id, if the peer sent one.
    pub id: Option<u64>,
    /// `return` payload or `error` body.
    pub outcome: std::result::Result<Value, ErrorDesc>,
}

/// Asynchronous event notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Event name, e.g. `DEVICE_DELETED`.
    pub event: String,
    /// Event specific payload.
    #[serde(default)]
    pub data: Value,
    /// Host time at which the event was emitted.
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl Event {
    /// Look up a string field in the event payload.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Event timestamp as sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub microseconds: i64,
}

impl Timestamp {
    /// Convert to a UTC time. Returns `None` for the `-1` placeholder the
    /// monitor uses when the host clock was unavailable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let micros = u32::try_from(self.microseconds).ok()?;
        if self.seconds < 0 {
            return None;
        }
        Utc.timestamp_opt(self.seconds, micros.checked_mul(1000)?)
            .single()
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Greeting(Greeting),
    Reply(Reply),
    Event(Event),
}

impl Frame {
    /// Parse and classify one line received from the monitor.
    ///
    /// Classification is by key: `event` wins over everything, then
    /// `return`/`error`, then `QMP`. Anything else is malformed.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| QmpError::Malformed(format!("invalid JSON: {e}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| QmpError::Malformed("frame is not a JSON object".into()))?;

        if object.contains_key("event") {
            let event = serde_json::from_value(value)
                .map_err(|e| QmpError::Malformed(format!("invalid event: {e}")))?;
            return Ok(Self::Event(event));
        }

        let id = object.get("id").and_then(Value::as_u64);
        if let Some(ret) = object.get("return") {
            return Ok(Self::Reply(Reply {
                id,
                outcome: Ok(ret.clone()),
            }));
        }
        if let Some(err) = object.get("error") {
            let desc: ErrorDesc = serde_json::from_value(err.clone())
                .map_err(|e| QmpError::Malformed(format!("invalid error reply: {e}")))?;
            return Ok(Self::Reply(Reply {
                id,
                outcome: Err(desc),
            }));
        }

        if object.contains_key("QMP") {
            let greeting = serde_json::from_value(value)
                .map_err(|e| QmpError::Malformed(format!("invalid greeting: {e}")))?;
            return Ok(Self::Greeting(greeting));
        }

        Err(QmpError::Malformed(format!("unrecognized frame: {line}")))
    }
}
