//! Sandbox controller: creation, loading, and teardown of isolation
//! boundary instances.
//!
//! Every generation gets a brand-new [`SandboxInstance`]; nothing is ever
//! reset in place. The controller owns instance lifecycles and sequences
//! the events an instance emits before handing them to the session.
//!
//! Isolation backends implement [`IsolationContext`]. The default backend,
//! [`process::ProcessIsolation`], runs each instance in its own preview-host
//! process.

pub mod process;
pub mod watchdog;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SandboxConfig;
use crate::models::artifact::Artifact;
use crate::models::event::{EventKind, ExecutionEvent, InstanceId};
use crate::{AppError, Result};

use watchdog::{Watchdog, WatchdogHandle};

/// Capacity of the per-instance channel between a backend and the sequencer.
const RAW_EVENT_BUFFER: usize = 64;

/// Capacity of the per-instance input channel.
const INPUT_BUFFER: usize = 16;

/// Process-wide instance id allocator. Ids are never reused.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of one sandbox instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Allocated; nothing running yet.
    Created,
    /// Artifact handed to the backend; waiting for `ready`.
    Loading,
    /// `ready` received.
    Running,
    /// Torn down by the controller.
    Destroyed,
    /// The isolation boundary failed.
    Failed,
}

/// Everything a backend needs to run one instance.
#[derive(Debug)]
pub struct LaunchRequest {
    /// Instance being launched.
    pub instance_id: InstanceId,
    /// Artifact to execute.
    pub artifact: Artifact,
    /// Unsequenced events out of the sandbox.
    pub events: mpsc::Sender<EventKind>,
    /// Interactive input into the sandbox.
    pub input: mpsc::Receiver<serde_json::Value>,
    /// Fires when the instance is destroyed; the backend must then release
    /// every resource it holds.
    pub cancel: CancellationToken,
}

/// An isolation backend.
///
/// `launch` resolves once the instance has been started. Events keep flowing
/// through [`LaunchRequest::events`] from tasks the backend spawns, until the
/// backend finishes or [`LaunchRequest::cancel`] fires.
pub trait IsolationContext: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Start executing `request.artifact` in a fresh isolation context.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sandbox`] when the context cannot be created.
    fn launch(&self, request: LaunchRequest)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

struct InstanceInner {
    instance_id: InstanceId,
    created_at: DateTime<Utc>,
    state: Mutex<InstanceState>,
    cancel: CancellationToken,
    input_tx: Mutex<Option<mpsc::Sender<serde_json::Value>>>,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

/// Handle to one sandbox instance. Cloning shares the same instance.
#[derive(Clone)]
pub struct SandboxInstance {
    inner: Arc<InstanceInner>,
}

impl std::fmt::Debug for SandboxInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxInstance")
            .field("instance_id", &self.inner.instance_id)
            .field("state", &self.state())
            .field("created_at", &self.inner.created_at)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SandboxInstance {
    fn new(instance_id: InstanceId) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                instance_id,
                created_at: Utc::now(),
                state: Mutex::new(InstanceState::Created),
                cancel: CancellationToken::new(),
                input_tx: Mutex::new(None),
                watchdog: Mutex::new(None),
            }),
        }
    }

    /// Instance identifier.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.inner.instance_id
    }

    /// Creation time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        *lock(&self.inner.state)
    }

    /// Whether the instance has been destroyed or has failed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self.state(), InstanceState::Destroyed | InstanceState::Failed)
    }

    /// Move to `next` unless the instance already reached a terminal state.
    fn advance(&self, next: InstanceState) -> bool {
        let mut state = lock(&self.inner.state);
        if matches!(*state, InstanceState::Destroyed | InstanceState::Failed) {
            return false;
        }
        *state = next;
        true
    }

    fn disarm_watchdog(&self) {
        if let Some(handle) = lock(&self.inner.watchdog).as_ref() {
            handle.disarm();
        }
    }

    fn heartbeat_watchdog(&self) {
        if let Some(handle) = lock(&self.inner.watchdog).as_ref() {
            handle.heartbeat();
        }
    }

    fn teardown(&self) {
        self.inner.cancel.cancel();
        lock(&self.inner.input_tx).take();
        lock(&self.inner.watchdog).take();
    }
}

/// Creates, loads, and destroys sandbox instances and sequences their
/// events onto one shared channel.
pub struct SandboxController {
    config: SandboxConfig,
    isolation: Arc<dyn IsolationContext>,
    event_tx: mpsc::Sender<ExecutionEvent>,
}

impl std::fmt::Debug for SandboxController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxController")
            .field("backend", &self.isolation.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SandboxController {
    /// Controller delivering sequenced events to `event_tx`.
    #[must_use]
    pub fn new(
        config: SandboxConfig,
        isolation: Arc<dyn IsolationContext>,
        event_tx: mpsc::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            config,
            isolation,
            event_tx,
        }
    }

    /// Allocate a fresh instance with a never-reused id.
    #[must_use]
    pub fn create(&self) -> SandboxInstance {
        let instance_id = InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed));
        debug!(%instance_id, backend = self.isolation.name(), "sandbox: instance created");
        SandboxInstance::new(instance_id)
    }

    /// Hand `artifact` to a fresh isolation context for `instance`.
    ///
    /// The execution-budget watchdog is armed before the backend starts and,
    /// when `sandbox.liveness_timeout_ms` is set, keeps checking heartbeats
    /// after `ready`. A backend failure is reported both as the returned error and as a
    /// `fatal` event on the instance's stream.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sandbox`] if the instance was already loaded or
    /// destroyed, or if the isolation context could not be started within
    /// `sandbox.startup_timeout_ms`.
    pub async fn load(&self, instance: &SandboxInstance, artifact: Artifact) -> Result<()> {
        let instance_id = instance.instance_id();
        {
            let mut state = lock(&instance.inner.state);
            if *state != InstanceState::Created {
                return Err(AppError::Sandbox(format!(
                    "{instance_id} cannot be loaded in state {:?}",
                    *state
                )));
            }
            *state = InstanceState::Loading;
        }

        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_BUFFER);
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        *lock(&instance.inner.input_tx) = Some(input_tx);

        let watchdog = Watchdog::new(
            instance_id,
            self.config.execution_budget(),
            raw_tx.clone(),
            instance.inner.cancel.clone(),
        )
        .with_liveness(self.config.liveness_timeout())
        .spawn();
        *lock(&instance.inner.watchdog) = Some(watchdog);

        tokio::spawn(
            sequence_events(instance.clone(), raw_rx, self.event_tx.clone())
                .instrument(info_span!("sandbox_events", instance_id = %instance_id)),
        );

        info!(
            %instance_id,
            backend = self.isolation.name(),
            language = %artifact.language_tag,
            digest = %artifact.digest(),
            "sandbox: loading artifact"
        );

        let request = LaunchRequest {
            instance_id,
            artifact,
            events: raw_tx.clone(),
            input: input_rx,
            cancel: instance.inner.cancel.clone(),
        };
        let launched =
            tokio::time::timeout(self.config.startup_timeout(), self.isolation.launch(request))
                .await
                .unwrap_or_else(|_| {
                    Err(AppError::Sandbox(format!(
                        "startup timeout: isolation context not started within {:?}",
                        self.config.startup_timeout()
                    )))
                });

        if let Err(err) = launched {
            warn!(%instance_id, error = %err, "sandbox: launch failed");
            let fatal = EventKind::Fatal {
                reason: format!("execution environment failed: {err}"),
            };
            if raw_tx.send(fatal).await.is_err() {
                debug!(%instance_id, "sandbox: event stream closed before launch failure");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Tear `instance` down. Further events from it are dropped. Idempotent.
    pub fn destroy(&self, instance: &SandboxInstance) {
        let first = {
            let mut state = lock(&instance.inner.state);
            let first = *state != InstanceState::Destroyed;
            *state = InstanceState::Destroyed;
            first
        };
        instance.teardown();
        if first {
            debug!(instance_id = %instance.instance_id(), "sandbox: instance destroyed");
        }
    }

    /// Forward an `input` payload to a loaded instance.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Sandbox`] if the instance is not loaded or has
    /// terminated.
    pub async fn send_input(
        &self,
        instance: &SandboxInstance,
        payload: serde_json::Value,
    ) -> Result<()> {
        let tx = lock(&instance.inner.input_tx).clone();
        let Some(tx) = tx else {
            return Err(AppError::Sandbox(format!(
                "{} is not accepting input",
                instance.instance_id()
            )));
        };
        tx.send(payload).await.map_err(|_| {
            AppError::Sandbox(format!("{} input channel closed", instance.instance_id()))
        })
    }
}

/// Assign per-instance sequence numbers and forward events until the
/// instance is torn down. A `fatal` event always ends the instance.
/// Heartbeats only feed the watchdog.
async fn sequence_events(
    instance: SandboxInstance,
    mut raw_rx: mpsc::Receiver<EventKind>,
    event_tx: mpsc::Sender<ExecutionEvent>,
) {
    let instance_id = instance.instance_id();
    let cancel = instance.inner.cancel.clone();
    let mut sequence = 0u64;

    loop {
        let kind = tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            kind = raw_rx.recv() => match kind {
                Some(kind) => kind,
                None => break,
            },
        };

        if kind == EventKind::Heartbeat {
            instance.heartbeat_watchdog();
            continue;
        }

        sequence += 1;
        let fatal = match &kind {
            EventKind::Ready => {
                instance.disarm_watchdog();
                instance.advance(InstanceState::Running);
                false
            }
            EventKind::Fatal { reason } => {
                warn!(%instance_id, reason = reason.as_str(), "sandbox: fatal boundary error");
                instance.advance(InstanceState::Failed);
                true
            }
            EventKind::Console { .. } | EventKind::Error { .. } | EventKind::Heartbeat => false,
        };

        let event = ExecutionEvent {
            instance_id,
            sequence,
            kind,
        };
        if event_tx.send(event).await.is_err() {
            debug!(%instance_id, "sandbox: event receiver dropped");
            break;
        }
        if fatal {
            instance.teardown();
            break;
        }
    }
}
