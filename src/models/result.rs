//! Consumer-facing execution results and session states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diagnostic::{Diagnostic, DiagnosticSource};
use super::event::{ConsoleLine, InstanceId};

/// How a generation settled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Artifact ran to `ready` without errors.
    Ready,
    /// Transform failure, runtime error, or boundary failure.
    Error,
}

/// Live session state machine.
///
/// `Idle → Pending → Compiling → Running → Settled`. Any edit returns the
/// machine to `Pending`; a forced refresh jumps straight to `Compiling`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing submitted yet.
    Idle,
    /// Debounce timer armed.
    Pending,
    /// Validating and transforming the latest source.
    Compiling,
    /// Sandbox instance loading or executing.
    Running,
    /// Generation finished.
    Settled(Settlement),
}

impl SessionState {
    /// Whether the state is terminal for the current generation.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

/// Failure of the isolation boundary itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FatalError {
    /// Failure reason; `"timeout"` when the execution budget was exceeded.
    pub reason: String,
}

impl FatalError {
    /// Whether the failure was an exceeded execution budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.reason == "timeout"
    }
}

/// Presentation-only viewport overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    /// Width in CSS pixels.
    pub width: u32,
    /// Height in CSS pixels.
    pub height: u32,
}

/// Snapshot of the active generation, possibly partial while running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Instance that produced the result; `None` before a sandbox exists.
    pub instance_id: Option<InstanceId>,
    /// Generation number (1-based; 0 before the first generation).
    pub generation: u64,
    /// Session state when the snapshot was taken.
    pub state: SessionState,
    /// Validator, transform, and runtime diagnostics.
    pub diagnostics: Vec<Diagnostic>,
    /// Captured console output in arrival order.
    pub console_lines: Vec<ConsoleLine>,
    /// Console lines dropped because the per-generation cap was reached.
    pub dropped_console_lines: u64,
    /// Boundary failure, if any.
    pub fatal_error: Option<FatalError>,
    /// Executable document on display for this generation.
    pub rendered: Option<String>,
    /// Presentation overlay.
    pub viewport: Option<Viewport>,
    /// When the generation settled.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            instance_id: None,
            generation: 0,
            state: SessionState::Idle,
            diagnostics: Vec::new(),
            console_lines: Vec::new(),
            dropped_console_lines: 0,
            fatal_error: None,
            rendered: None,
            viewport: None,
            completed_at: None,
        }
    }
}

impl ExecutionResult {
    /// Whether any error-severity diagnostic or fatal error is present.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.fatal_error.is_some() || self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Runtime exceptions reported by the sandbox.
    pub fn runtime_errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.source == DiagnosticSource::Runtime)
    }

    /// Short user-facing explanation of the result, if it is a failure.
    ///
    /// Boundary failures and runtime exceptions are reported differently so
    /// that users know whether to retry or to fix their code.
    #[must_use]
    pub fn user_message(&self) -> Option<&'static str> {
        if self.fatal_error.is_some() {
            return Some("execution environment failed, retry");
        }
        if self
            .diagnostics
            .iter()
            .any(|d| d.source == DiagnosticSource::Transform)
        {
            return Some("could not prepare your code for preview");
        }
        if self.runtime_errors().next().is_some() {
            return Some("your code threw an exception");
        }
        None
    }
}
