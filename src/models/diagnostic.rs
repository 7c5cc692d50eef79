//! Diagnostics produced by the validator, the transform pipeline, and the sandbox.

use serde::{Deserialize, Serialize};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Advisory only.
    Warning,
    /// Blocks a clean result.
    Error,
}

/// Which stage produced a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSource {
    /// Static, non-executing source validation.
    Validator,
    /// Transform pipeline failure.
    Transform,
    /// Uncaught exception reported from inside the sandbox.
    Runtime,
}

/// A single diagnostic message. Lines and columns are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Line, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Column, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Producing stage.
    pub source: DiagnosticSource,
    /// Stack trace for runtime errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl Diagnostic {
    /// Validator error.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message, DiagnosticSource::Validator)
    }

    /// Validator warning.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message, DiagnosticSource::Validator)
    }

    /// Transform failure diagnostic.
    #[must_use]
    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message, DiagnosticSource::Transform)
    }

    /// Runtime exception diagnostic.
    #[must_use]
    pub fn runtime(message: impl Into<String>, stack: Option<String>) -> Self {
        let mut diag = Self::new(Severity::Error, message, DiagnosticSource::Runtime);
        diag.stack = stack;
        diag
    }

    fn new(severity: Severity, message: impl Into<String>, source: DiagnosticSource) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
            column: None,
            source,
            stack: None,
        }
    }

    /// Attach a 1-based position.
    #[must_use]
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Whether this diagnostic is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
