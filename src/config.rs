//! Engine configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::channel::HEARTBEAT_INTERVAL_MS;
use crate::{AppError, Result};

/// Environment variable overriding [`SandboxConfig::runtime_program`].
pub const ENV_RUNTIME: &str = "LIVE_PREVIEW_RUNTIME";

/// Environment variable overriding [`SandboxConfig::execution_budget_ms`].
pub const ENV_BUDGET_MS: &str = "LIVE_PREVIEW_BUDGET_MS";

/// Live session timing and delivery settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SessionConfig {
    /// Quiet window after the last edit before a generation starts.
    pub debounce_ms: u64,
    /// Push a snapshot to subscribers on every console line, not only on settle.
    pub notify_on_console: bool,
    /// Maximum console lines retained per generation; oldest lines are dropped.
    pub max_console_lines: usize,
    /// Capacity of the event channel between sandbox instances and the session.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            notify_on_console: true,
            max_console_lines: 1000,
            event_buffer: 256,
        }
    }
}

impl SessionConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Isolation boundary settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SandboxConfig {
    /// Preview host program spawned for every sandbox instance.
    pub runtime_program: String,
    /// Arguments passed to the preview host.
    pub runtime_args: Vec<String>,
    /// Wall-clock budget for the artifact's initial synchronous execution.
    pub execution_budget_ms: u64,
    /// Maximum time allowed for the preview host process to start.
    pub startup_timeout_ms: u64,
    /// Silence allowed after `ready` before a running instance counts as
    /// hung and fails with `timeout`. `0` disables the check.
    pub liveness_timeout_ms: u64,
    /// Environment variables inherited by the preview host; everything else is cleared.
    pub inherit_env: Vec<String>,
    /// Parent directory for per-instance scratch directories (system temp dir if unset).
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_program: "preview-host".into(),
            runtime_args: Vec::new(),
            execution_budget_ms: 5000,
            startup_timeout_ms: 10_000,
            liveness_timeout_ms: 10_000,
            inherit_env: default_inherit_env(),
            scratch_dir: None,
        }
    }
}

impl SandboxConfig {
    /// Execution budget as a [`Duration`].
    #[must_use]
    pub fn execution_budget(&self) -> Duration {
        Duration::from_millis(self.execution_budget_ms)
    }

    /// Startup timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Post-`ready` liveness window, or `None` when disabled.
    #[must_use]
    pub fn liveness_timeout(&self) -> Option<Duration> {
        (self.liveness_timeout_ms > 0).then(|| Duration::from_millis(self.liveness_timeout_ms))
    }
}

fn default_inherit_env() -> Vec<String> {
    ["PATH", "HOME", "LANG", "SystemRoot", "TEMP", "TMP"]
        .iter()
        .map(|&s| s.to_owned())
        .collect()
}

/// Source validator limits.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ValidatorConfig {
    /// Sources larger than this are not scanned.
    pub max_source_bytes: usize,
    /// Maximum bracket or tag nesting depth tracked before giving up.
    pub max_nesting_depth: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 512 * 1024,
            max_nesting_depth: 512,
        }
    }
}

/// Transform pipeline limits and document-shell settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TransformConfig {
    /// Sources larger than this fail to transform.
    pub max_source_bytes: usize,
    /// Element id the component harness mounts into.
    pub root_element_id: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: 2 * 1024 * 1024,
            root_element_id: "root".into(),
        }
    }
}

impl TransformConfig {
    /// Whether `root_element_id` is a non-empty `[A-Za-z0-9_-]` identifier,
    /// which can be placed in markup and script without escaping.
    #[must_use]
    pub fn root_element_id_is_valid(&self) -> bool {
        !self.root_element_id.is_empty()
            && self
                .root_element_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

/// Engine configuration parsed from `live-preview.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct PreviewConfig {
    /// Debounce and delivery settings.
    pub session: SessionConfig,
    /// Isolation boundary settings.
    pub sandbox: SandboxConfig,
    /// Validator limits.
    pub validator: ValidatorConfig,
    /// Transform limits.
    pub transform: TransformConfig,
}

impl PreviewConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LIVE_PREVIEW_*` environment overrides on top of the parsed values.
    ///
    /// Unparseable values are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the overridden configuration is invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(program) = env::var(ENV_RUNTIME) {
            if !program.trim().is_empty() {
                self.sandbox.runtime_program = program;
            }
        }

        if let Ok(raw) = env::var(ENV_BUDGET_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.sandbox.execution_budget_ms = ms,
                Err(err) => warn!(%err, value = raw.as_str(), "ignoring invalid {ENV_BUDGET_MS}"),
            }
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.sandbox.execution_budget_ms == 0 {
            return Err(AppError::Config(
                "sandbox.execution_budget_ms must be greater than zero".into(),
            ));
        }

        if self.sandbox.liveness_timeout_ms != 0
            && self.sandbox.liveness_timeout_ms < 2 * HEARTBEAT_INTERVAL_MS
        {
            return Err(AppError::Config(format!(
                "sandbox.liveness_timeout_ms must be 0 or at least {}",
                2 * HEARTBEAT_INTERVAL_MS
            )));
        }

        if self.sandbox.runtime_program.trim().is_empty() {
            return Err(AppError::Config(
                "sandbox.runtime_program must not be empty".into(),
            ));
        }

        if self.session.event_buffer == 0 {
            return Err(AppError::Config(
                "session.event_buffer must be greater than zero".into(),
            ));
        }

        if self.session.max_console_lines == 0 {
            return Err(AppError::Config(
                "session.max_console_lines must be greater than zero".into(),
            ));
        }

        if self.validator.max_nesting_depth == 0 {
            return Err(AppError::Config(
                "validator.max_nesting_depth must be greater than zero".into(),
            ));
        }

        if !self.transform.root_element_id_is_valid() {
            return Err(AppError::Config(
                "transform.root_element_id must be a non-empty [A-Za-z0-9_-] identifier".into(),
            ));
        }

        Ok(())
    }
}
