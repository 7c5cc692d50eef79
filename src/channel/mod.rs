//! Execution channel protocol between the controller and a sandbox.
//!
//! Messages are newline-delimited JSON envelopes of the form
//! `{"method": "...", "params": {...}}`.
//!
//! | Direction          | Method      | Params                                |
//! |--------------------|-------------|---------------------------------------|
//! | sandbox → host     | `console`   | `level`, `text`                       |
//! | sandbox → host     | `error`     | `message`, `stack?`                   |
//! | sandbox → host     | `ready`     | none                                  |
//! | sandbox → host     | `heartbeat` | none                                  |
//! | sandbox → host     | `fatal`     | `reason`                              |
//! | host → sandbox     | `load`      | `instance_id`, `language`, `document` |
//! | host → sandbox     | `input`     | `payload`                             |
//!
//! Sequence numbers are not part of the wire format; the controller assigns
//! them on receipt. After `ready` a sandbox sends `heartbeat` every
//! [`HEARTBEAT_INTERVAL_MS`] for as long as its event loop is responsive.

pub mod codec;
pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::event::{EventKind, InstanceId};
use crate::{AppError, Result};

/// Interval between `heartbeat` messages from a running sandbox.
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Controller → sandbox message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Execute an artifact. Always the first message an instance receives.
    Load {
        /// Instance the artifact belongs to.
        instance_id: u64,
        /// Normalized source language tag.
        language: String,
        /// Executable document.
        document: String,
    },
    /// Forward interactive input to running code.
    Input {
        /// Opaque caller-supplied payload.
        payload: serde_json::Value,
    },
}

/// Sandbox → controller envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ConsoleParams {
    #[serde(default = "default_console_level")]
    level: String,
    text: String,
}

fn default_console_level() -> String {
    "log".into()
}

#[derive(Debug, Deserialize)]
struct ErrorParams {
    message: String,
    #[serde(default)]
    stack: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FatalParams {
    reason: String,
}

/// Parse one inbound NDJSON line.
///
/// Returns `Ok(None)` for blank lines and unknown methods.
///
/// # Errors
///
/// Returns [`AppError::Channel`] when the line is not a JSON envelope or a
/// known method lacks a required parameter.
pub fn parse_inbound_line(instance_id: InstanceId, line: &str) -> Result<Option<EventKind>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Channel(format!("malformed json: {e}")))?;

    let kind = match envelope.method.as_str() {
        "console" => {
            let p: ConsoleParams = params(&envelope)?;
            EventKind::Console {
                level: p.level,
                text: p.text,
            }
        }
        "error" => {
            let p: ErrorParams = params(&envelope)?;
            EventKind::Error {
                message: p.message,
                stack: p.stack,
            }
        }
        "ready" => EventKind::Ready,
        "heartbeat" => EventKind::Heartbeat,
        "fatal" => {
            let p: FatalParams = params(&envelope)?;
            EventKind::Fatal { reason: p.reason }
        }
        other => {
            debug!(%instance_id, method = other, "channel: skipping unknown inbound method");
            return Ok(None);
        }
    };
    Ok(Some(kind))
}

fn params<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    serde_json::from_value(envelope.params.clone()).map_err(|e| {
        AppError::Channel(format!("invalid {} params: {e}", envelope.method))
    })
}

/// Serialize a control message as one NDJSON line, newline included.
///
/// # Errors
///
/// Returns [`AppError::Channel`] if serialization fails.
pub fn encode_control(message: &ControlMessage) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}
