//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all hard failure modes.
///
/// Validation and transform problems are never reported through this type;
/// they travel as data (see [`crate::models::diagnostic::Diagnostic`] and
/// [`crate::transform::TransformFailure`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Execution channel framing or protocol failure.
    Channel(String),
    /// Isolation boundary could not be created, loaded, or driven.
    Sandbox(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Operation attempted on a session that has already been disposed.
    Disposed(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Sandbox(msg) => write!(f, "sandbox: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Disposed(msg) => write!(f, "disposed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Channel(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
