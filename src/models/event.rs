//! Execution events streamed out of sandbox instances.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identifier of one sandbox instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "sbx-{}", self.0)
    }
}

/// Kind and payload of an execution event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Log-like output from sandboxed code.
    Console {
        /// Console level (`log`, `info`, `warn`, `error`, `debug`, `stderr`).
        level: String,
        /// Rendered text.
        text: String,
    },
    /// Uncaught exception; the instance keeps running.
    Error {
        /// Exception message.
        message: String,
        /// Stack trace, when available.
        stack: Option<String>,
    },
    /// The artifact finished its initial synchronous execution.
    Ready,
    /// Liveness signal from a running instance. Consumed by the controller;
    /// never sequenced or delivered.
    Heartbeat,
    /// The isolation boundary failed; the instance is torn down.
    Fatal {
        /// Failure reason; `"timeout"` for an exceeded execution budget.
        reason: String,
    },
}

/// One ordered event from one sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Emitting instance.
    pub instance_id: InstanceId,
    /// Per-instance, strictly increasing sequence number starting at 1.
    pub sequence: u64,
    /// Event kind and payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ExecutionEvent {
    /// Whether this event ends the instance.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, EventKind::Fatal { .. })
    }
}

/// A captured console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    /// Console level.
    pub level: String,
    /// Rendered text.
    pub text: String,
    /// Sequence number of the originating event.
    pub sequence: u64,
}
