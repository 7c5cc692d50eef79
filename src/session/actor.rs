//! The session actor: one task owning all generation state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, Folded};
use crate::config::PreviewConfig;
use crate::models::event::ExecutionEvent;
use crate::models::result::{ExecutionResult, SessionState, Settlement, Viewport};
use crate::models::source::LanguageTag;
use crate::sandbox::{SandboxController, SandboxInstance};
use crate::transform::TransformRegistry;
use crate::validator;
use crate::{AppError, Result};

use super::subscription::Subscribers;

/// Requests from [`super::LiveSession`] handles.
pub(crate) enum Command {
    Submit {
        text: String,
        language: LanguageTag,
    },
    ForceRefresh,
    SetViewport(Viewport),
    SendInput {
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct SessionActor {
    pub(crate) session_id: String,
    pub(crate) config: PreviewConfig,
    pub(crate) registry: Arc<TransformRegistry>,
    pub(crate) controller: Arc<SandboxController>,
    pub(crate) aggregator: Aggregator,
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) snapshots: watch::Sender<ExecutionResult>,
    pub(crate) subscribers: Arc<Mutex<Subscribers>>,
    pub(crate) latest: Option<(String, LanguageTag)>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) current: Option<SandboxInstance>,
}

impl SessionActor {
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<ExecutionEvent>,
        cancel: CancellationToken,
    ) {
        info!(session_id = self.session_id.as_str(), "live session started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        debug!(session_id = self.session_id.as_str(), "session: all handles dropped");
                        break;
                    };
                    self.handle(cmd);
                }

                Some(event) = events.recv() => self.on_event(event),

                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.start_generation();
                }
            }
        }

        if let Some(instance) = self.current.take() {
            self.controller.destroy(&instance);
        }
        Subscribers::clear(&self.subscribers);
        info!(
            session_id = self.session_id.as_str(),
            generations = self.generation.load(Ordering::SeqCst),
            stale_events = self.aggregator.stale_events(),
            "live session disposed"
        );
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { text, language } => {
                debug!(
                    session_id = self.session_id.as_str(),
                    language = %language,
                    bytes = text.len(),
                    "session: edit received, debounce armed"
                );
                self.latest = Some((text, language));
                self.deadline = Some(Instant::now() + self.config.session.debounce());
                self.aggregator.set_state(SessionState::Pending);
                self.publish();
            }
            Command::ForceRefresh => {
                if self.latest.is_none() {
                    debug!(session_id = self.session_id.as_str(), "session: refresh with no source, ignored");
                    return;
                }
                self.deadline = None;
                self.start_generation();
            }
            Command::SetViewport(viewport) => {
                self.aggregator.set_viewport(viewport);
                self.publish();
            }
            Command::SendInput { payload, reply } => {
                let Some(instance) = self.current.clone() else {
                    let _ = reply.send(Err(AppError::Sandbox("no sandbox instance is running".into())));
                    return;
                };
                let controller = Arc::clone(&self.controller);
                tokio::spawn(async move {
                    let _ = reply.send(controller.send_input(&instance, payload).await);
                });
            }
        }
    }

    /// Supersede the current generation with the latest submitted source.
    fn start_generation(&mut self) {
        let Some((text, language)) = self.latest.clone() else {
            return;
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = self.session_id.as_str();

        if let Some(previous) = self.current.take() {
            debug!(session_id, generation, instance_id = %previous.instance_id(), "session: superseding instance");
            self.controller.destroy(&previous);
        }

        self.aggregator.begin_generation(generation);
        self.publish();
        info!(session_id, generation, language = %language, "session: compiling");

        let validation = validator::validate_with(&text, &language, &self.config.validator);
        if !validation.valid {
            debug!(
                session_id,
                generation,
                errors = validation.errors().count(),
                "session: validator reported errors"
            );
        }
        self.aggregator.add_diagnostics(validation.diagnostics);

        let artifact = match self.registry.transform(&text, &language) {
            Ok(artifact) => artifact,
            Err(failure) => {
                info!(
                    session_id,
                    generation,
                    reason = failure.message(),
                    delegate_external = failure.delegate_external,
                    "session: transform failed"
                );
                self.aggregator.add_diagnostics(failure.diagnostics);
                self.aggregator.settle(Settlement::Error);
                self.publish_and_notify();
                return;
            }
        };

        self.aggregator.set_rendered(artifact.executable_document.clone());
        let instance = self.controller.create();
        self.aggregator.attach_instance(instance.instance_id());
        self.aggregator.set_state(SessionState::Running);
        self.current = Some(instance.clone());
        self.publish();

        let controller = Arc::clone(&self.controller);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            if let Err(err) = controller.load(&instance, artifact).await {
                warn!(
                    session_id = session_id.as_str(),
                    generation,
                    instance_id = %instance.instance_id(),
                    %err,
                    "session: sandbox load failed"
                );
            }
        });
    }

    fn on_event(&mut self, event: ExecutionEvent) {
        let folded = self.aggregator.accumulate(event);
        match folded {
            Folded::Stale | Folded::Duplicate | Folded::Heartbeat => {
                debug!(session_id = self.session_id.as_str(), ?folded, "session: event dropped");
            }
            Folded::Console | Folded::RuntimeError => {
                if self.config.session.notify_on_console || self.aggregator.state().is_settled() {
                    self.publish_and_notify();
                } else {
                    self.publish();
                }
            }
            Folded::Settled(settlement) => {
                info!(
                    session_id = self.session_id.as_str(),
                    generation = self.generation.load(Ordering::SeqCst),
                    ?settlement,
                    "session: generation settled"
                );
                self.publish_and_notify();
            }
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.aggregator.snapshot());
    }

    fn publish_and_notify(&self) {
        let snapshot = self.aggregator.snapshot();
        self.snapshots.send_replace(snapshot.clone());
        Subscribers::notify(&self.subscribers, &snapshot);
    }
}
