//! Live session manager.
//!
//! A [`LiveSession`] debounces edits, sequences generations, and drives
//! sandbox teardown. All generation state lives in one actor task; the
//! handle only enqueues commands and reads published snapshots.
//!
//! State machine: `Idle → Pending → Compiling → Running → Settled`.
//! Every edit re-arms the debounce timer; when it fires, the outgoing
//! sandbox instance is destroyed without waiting and a new one is loaded.

mod actor;
mod subscription;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::config::PreviewConfig;
use crate::models::result::{ExecutionResult, SessionState, Viewport};
use crate::models::source::{LanguageTag, SourceUnit};
use crate::sandbox::process::ProcessIsolation;
use crate::sandbox::{IsolationContext, SandboxController};
use crate::transform::TransformRegistry;
use crate::{AppError, Result};

use actor::{Command, SessionActor};
use subscription::Subscribers;

pub use subscription::{Callback, Subscription};

/// Handle to one live-preview session.
///
/// Must be created inside a tokio runtime. Dropping the handle disposes the
/// session.
pub struct LiveSession {
    session_id: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ExecutionResult>,
    subscribers: Arc<Mutex<Subscribers>>,
    generation: Arc<AtomicU64>,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl LiveSession {
    /// Session running every instance through `isolation`.
    #[must_use]
    pub fn new(config: PreviewConfig, isolation: Arc<dyn IsolationContext>) -> Self {
        let registry = Arc::new(TransformRegistry::new(config.transform.clone()));
        Self::with_registry(config, isolation, registry)
    }

    /// Session using the preview-host process backend.
    #[must_use]
    pub fn with_process_backend(config: PreviewConfig) -> Self {
        let isolation = Arc::new(ProcessIsolation::new(config.sandbox.clone()));
        Self::new(config, isolation)
    }

    /// Session dispatching transforms through a caller-supplied registry.
    #[must_use]
    pub fn with_registry(
        config: PreviewConfig,
        isolation: Arc<dyn IsolationContext>,
        registry: Arc<TransformRegistry>,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.session.event_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(ExecutionResult::default());
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let generation = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let controller = Arc::new(SandboxController::new(
            config.sandbox.clone(),
            isolation,
            event_tx,
        ));

        let actor = SessionActor {
            session_id: session_id.clone(),
            aggregator: Aggregator::new(config.session.max_console_lines),
            config,
            registry,
            controller,
            generation: Arc::clone(&generation),
            snapshots: snapshot_tx,
            subscribers: Arc::clone(&subscribers),
            latest: None,
            deadline: None,
            current: None,
        };

        tokio::spawn(
            actor
                .run(command_rx, event_rx, cancel.clone())
                .instrument(info_span!("live_session", session_id = session_id.as_str())),
        );

        Self {
            session_id,
            commands: command_tx,
            snapshots: snapshot_rx,
            subscribers,
            generation,
            disposed: AtomicBool::new(false),
            cancel,
        }
    }

    /// Identifier used in logs.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Debounced edit intake.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disposed`] after [`dispose`](Self::dispose).
    pub fn submit(&self, text: impl Into<String>, language_tag: &str) -> Result<()> {
        self.send(Command::Submit {
            text: text.into(),
            language: LanguageTag::new(language_tag),
        })
    }

    /// Debounced intake of a caller-owned [`SourceUnit`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disposed`] after [`dispose`](Self::dispose).
    pub fn submit_unit(&self, unit: &SourceUnit) -> Result<()> {
        self.send(Command::Submit {
            text: unit.text.clone(),
            language: unit.language_tag.clone(),
        })
    }

    /// Start a generation immediately with the latest submitted source.
    /// No-op when nothing was ever submitted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disposed`] after [`dispose`](Self::dispose).
    pub fn force_refresh(&self) -> Result<()> {
        self.send(Command::ForceRefresh)
    }

    /// Update the presentation overlay. Never starts a generation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disposed`] after [`dispose`](Self::dispose).
    pub fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send(Command::SetViewport(Viewport { width, height }))
    }

    /// Forward an `input` payload to the current sandbox instance.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disposed`] after [`dispose`](Self::dispose), or
    /// [`AppError::Sandbox`] when no instance is accepting input.
    pub async fn send_input(&self, payload: serde_json::Value) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::SendInput {
            payload,
            reply: reply_tx,
        })?;
        reply_rx
            .await
            .map_err(|_| AppError::Disposed("session stopped before input was delivered".into()))?
    }

    /// Register a callback pushed on every settle and, when
    /// `session.notify_on_console` is set, on console output.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ExecutionResult) + Send + Sync + 'static,
    {
        Subscribers::add(&self.subscribers, Arc::new(callback))
    }

    /// Latest published result.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionResult {
        self.snapshots.borrow().clone()
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.snapshots.borrow().state
    }

    /// Number of generations started so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Receiver observing every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ExecutionResult> {
        self.snapshots.clone()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Tear the session down. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if self.is_disposed() {
            return Err(AppError::Disposed(format!(
                "session {} has been disposed",
                self.session_id
            )));
        }
        self.commands
            .send(cmd)
            .map_err(|_| AppError::Disposed(format!("session {} has stopped", self.session_id)))
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
