//! Process isolation backend.
//!
//! Every instance runs in its own preview-host process:
//! - a fresh process group (unix), killed as a whole on teardown;
//! - an empty scratch working directory, removed on teardown;
//! - `env_clear()` plus the configured allowlist, so nothing from the host
//!   environment leaks into sandboxed code.
//!
//! The host speaks the channel protocol on stdio. The first message it
//! receives is always `load`.

use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channel::reader::{run_reader, run_stderr_reader};
use crate::channel::writer::run_writer;
use crate::channel::ControlMessage;
use crate::config::SandboxConfig;
use crate::models::event::{EventKind, InstanceId};
use crate::sandbox::{IsolationContext, LaunchRequest};
use crate::{AppError, Result};

/// Environment variable carrying the instance id into the preview host.
pub const ENV_INSTANCE_ID: &str = "LIVE_PREVIEW_INSTANCE_ID";

const CONTROL_BUFFER: usize = 16;
const STDOUT_BUFFER: usize = 64;

/// Runs each sandbox instance as a separate preview-host process.
#[derive(Debug, Clone)]
pub struct ProcessIsolation {
    config: SandboxConfig,
}

impl ProcessIsolation {
    /// Backend spawning `config.runtime_program` for every instance.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("live-preview-");
        let dir = match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|err| AppError::Sandbox(format!("failed to create scratch directory: {err}")))
    }

    fn command(&self, instance_id: InstanceId, cwd: &TempDir) -> Command {
        let mut cmd = Command::new(&self.config.runtime_program);
        cmd.args(&self.config.runtime_args);

        cmd.env_clear();
        for key in &self.config.inherit_env {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.env(ENV_INSTANCE_ID, instance_id.get().to_string());

        cmd.current_dir(cwd.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    async fn start(&self, request: LaunchRequest) -> Result<()> {
        let LaunchRequest {
            instance_id,
            artifact,
            events,
            input,
            cancel,
        } = request;

        let scratch = self.scratch_dir()?;
        let mut child = self.command(instance_id, &scratch).spawn().map_err(|err| {
            AppError::Sandbox(format!(
                "failed to spawn preview host `{}`: {err}",
                self.config.runtime_program
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Sandbox("failed to capture preview host stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Sandbox("failed to capture preview host stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Sandbox("failed to capture preview host stderr".into()))?;

        let pgid = child.id().and_then(|id| i32::try_from(id).ok());
        info!(
            %instance_id,
            pid = child.id().unwrap_or_default(),
            program = self.config.runtime_program.as_str(),
            "process sandbox: preview host spawned"
        );

        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let load = ControlMessage::Load {
            instance_id: instance_id.get(),
            language: artifact.language_tag.as_str().to_owned(),
            document: artifact.executable_document,
        };
        control_tx
            .send(load)
            .await
            .map_err(|_| AppError::Sandbox("control channel closed before load".into()))?;

        let span = info_span!("process_sandbox", instance_id = %instance_id);

        let writer_cancel = cancel.clone();
        tokio::spawn(
            async move {
                if let Err(err) = run_writer(instance_id, stdin, control_rx, writer_cancel).await {
                    debug!(%instance_id, error = %err, "process sandbox: writer stopped");
                }
            }
            .instrument(span.clone()),
        );

        tokio::spawn(
            forward_input(instance_id, input, control_tx, cancel.clone()).instrument(span.clone()),
        );

        let (stdout_tx, stdout_rx) = mpsc::channel(STDOUT_BUFFER);
        tokio::spawn(
            run_reader(instance_id, stdout, stdout_tx, cancel.clone()).instrument(span.clone()),
        );
        tokio::spawn(
            run_stderr_reader(instance_id, stderr, events.clone(), cancel.clone())
                .instrument(span.clone()),
        );

        let ready_seen = Arc::new(AtomicBool::new(false));
        let forward = tokio::spawn(
            relay_stdout(stdout_rx, events.clone(), Arc::clone(&ready_seen))
                .instrument(span.clone()),
        );

        tokio::spawn(
            supervise(Supervised {
                instance_id,
                child,
                pgid,
                forward,
                ready_seen,
                events,
                cancel,
                scratch,
            })
            .instrument(span),
        );

        Ok(())
    }
}

impl IsolationContext for ProcessIsolation {
    fn name(&self) -> &'static str {
        "process"
    }

    fn launch(
        &self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.start(request))
    }
}

/// Turn caller payloads into `input` control messages.
async fn forward_input(
    instance_id: InstanceId,
    mut input: mpsc::Receiver<serde_json::Value>,
    control_tx: mpsc::Sender<ControlMessage>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            payload = input.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        if control_tx.send(ControlMessage::Input { payload }).await.is_err() {
            debug!(%instance_id, "process sandbox: writer gone, dropping input");
            break;
        }
    }
}

/// Relay stdout events, remembering whether `ready` went through.
async fn relay_stdout(
    mut stdout_rx: mpsc::Receiver<EventKind>,
    events: mpsc::Sender<EventKind>,
    ready_seen: Arc<AtomicBool>,
) {
    while let Some(kind) = stdout_rx.recv().await {
        if kind == EventKind::Ready {
            ready_seen.store(true, Ordering::SeqCst);
        }
        if events.send(kind).await.is_err() {
            break;
        }
    }
}

struct Supervised {
    instance_id: InstanceId,
    child: Child,
    pgid: Option<i32>,
    forward: JoinHandle<()>,
    ready_seen: Arc<AtomicBool>,
    events: mpsc::Sender<EventKind>,
    cancel: CancellationToken,
    scratch: TempDir,
}

/// Wait for the host to exit or for teardown, then release the process
/// group and the scratch directory.
async fn supervise(task: Supervised) {
    let Supervised {
        instance_id,
        mut child,
        pgid,
        forward,
        ready_seen,
        events,
        cancel,
        scratch,
    } = task;

    tokio::select! {
        biased;

        () = cancel.cancelled() => {
            debug!(%instance_id, "process sandbox: teardown requested");
            kill_group(instance_id, pgid);
            if let Err(err) = child.kill().await {
                debug!(%instance_id, %err, "process sandbox: kill failed");
            }
        }

        status = child.wait() => {
            let reason = exit_reason(instance_id, status);
            // Drain stdout so a `ready` written just before exit still counts.
            tokio::select! {
                _ = forward => {}
                () = cancel.cancelled() => {}
            }
            if ready_seen.load(Ordering::SeqCst) || cancel.is_cancelled() {
                debug!(%instance_id, reason = reason.as_str(), "process sandbox: preview host exited");
            } else {
                let fatal = EventKind::Fatal {
                    reason: format!("{reason} before ready"),
                };
                if events.send(fatal).await.is_err() {
                    debug!(%instance_id, "process sandbox: event stream closed before exit report");
                }
            }
        }
    }

    // Leftover descendants of an exited host still share its group.
    kill_group(instance_id, pgid);

    if let Err(err) = scratch.close() {
        warn!(%instance_id, %err, "process sandbox: failed to remove scratch directory");
    }
}

fn exit_reason(instance_id: InstanceId, status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.code().map_or_else(
            || "process terminated by signal".to_owned(),
            |code| format!("process exited with code {code}"),
        ),
        Err(err) => {
            warn!(%instance_id, %err, "process sandbox: error waiting for preview host");
            format!("process wait error: {err}")
        }
    }
}

/// Kill every process in the host's group.
#[cfg(unix)]
fn kill_group(instance_id: InstanceId, pgid: Option<i32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid else { return };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => debug!(%instance_id, %err, "process sandbox: killpg failed"),
    }
}

#[cfg(not(unix))]
fn kill_group(_instance_id: InstanceId, _pgid: Option<i32>) {}
