//! Process backend tests using `/bin/sh` as a stand-in preview host.
//!
//! Host scripts stick to shell builtins so they work with an empty `PATH`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use live_preview::config::SandboxConfig;
use live_preview::models::artifact::Artifact;
use live_preview::models::event::{EventKind, ExecutionEvent};
use live_preview::models::source::LanguageTag;
use live_preview::sandbox::process::ProcessIsolation;
use live_preview::sandbox::{InstanceState, SandboxController};
use live_preview::AppError;

const WAIT: Duration = Duration::from_secs(10);

fn host(script: &str, budget_ms: u64, scratch: &Path) -> SandboxConfig {
    SandboxConfig {
        runtime_program: "/bin/sh".into(),
        runtime_args: vec!["-c".into(), script.into()],
        execution_budget_ms: budget_ms,
        startup_timeout_ms: 5000,
        liveness_timeout_ms: 10_000,
        inherit_env: Vec::new(),
        scratch_dir: Some(scratch.to_path_buf()),
    }
}

fn controller(config: SandboxConfig) -> (SandboxController, mpsc::Receiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::channel(32);
    let isolation = Arc::new(ProcessIsolation::new(config.clone()));
    (SandboxController::new(config, isolation, tx), rx)
}

fn artifact() -> Artifact {
    Artifact {
        language_tag: LanguageTag::new("html"),
        executable_document: "<!DOCTYPE html><p>\"quoted\"\nline</p>".into(),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ExecutionEvent>) -> ExecutionEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event in time")
        .expect("event stream open")
}

async fn console_text(rx: &mut mpsc::Receiver<ExecutionEvent>) -> String {
    match next_event(rx).await.kind {
        EventKind::Console { text, .. } => text,
        other => panic!("expected console, got {other:?}"),
    }
}

async fn wait_until_empty(dir: &Path) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let entries = std::fs::read_dir(dir).expect("scratch parent").count();
        if entries == 0 {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "scratch directory not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn host_receives_load_and_reports_ready() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let script = r#"
read -r line
case "$line" in
  *'"method":"load"'*) printf '{"method":"console","params":{"text":"got load"}}\n' ;;
  *) printf '{"method":"console","params":{"text":"unexpected"}}\n' ;;
esac
printf '{"method":"ready"}\n'
read -r never
"#;
    let (ctl, mut rx) = controller(host(script, 5000, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");

    let first = next_event(&mut rx).await;
    assert_eq!(first.sequence, 1);
    assert!(matches!(first.kind, EventKind::Console { ref text, .. } if text == "got load"));
    let second = next_event(&mut rx).await;
    assert_eq!(second.sequence, 2);
    assert_eq!(second.kind, EventKind::Ready);
    assert_eq!(instance.state(), InstanceState::Running);

    ctl.destroy(&instance);
    wait_until_empty(scratch.path()).await;
}

#[tokio::test]
async fn host_runs_in_a_clean_environment_and_scratch_directory() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let script = r#"
read -r line
printf '{"method":"console","params":{"text":"id=%s"}}\n' "$LIVE_PREVIEW_INSTANCE_ID"
printf '{"method":"console","params":{"text":"manifest=%s"}}\n' "${CARGO_MANIFEST_DIR:-unset}"
printf '{"method":"console","params":{"text":"cwd=%s"}}\n' "$(pwd)"
printf '{"method":"ready"}\n'
read -r never
"#;
    let (ctl, mut rx) = controller(host(script, 5000, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");

    assert_eq!(
        console_text(&mut rx).await,
        format!("id={}", instance.instance_id().get())
    );
    assert_eq!(console_text(&mut rx).await, "manifest=unset");

    let cwd = console_text(&mut rx).await;
    let cwd = cwd.strip_prefix("cwd=").expect("cwd line");
    let parent = scratch.path().canonicalize().expect("canonical parent");
    let cwd = Path::new(cwd).canonicalize().expect("canonical cwd");
    assert_eq!(cwd.parent(), Some(parent.as_path()));
    assert!(cwd
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("live-preview-")));

    assert_eq!(next_event(&mut rx).await.kind, EventKind::Ready);
    ctl.destroy(&instance);
    wait_until_empty(scratch.path()).await;
}

#[tokio::test]
async fn stderr_is_captured_as_console_output() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let script = r#"
read -r line
echo 'deprecated api' >&2
read -r never
"#;
    let (ctl, mut rx) = controller(host(script, 5000, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");

    let event = next_event(&mut rx).await;
    assert!(matches!(
        event.kind,
        EventKind::Console { ref level, ref text } if level == "stderr" && text == "deprecated api"
    ));
    ctl.destroy(&instance);
}

#[tokio::test]
async fn input_is_forwarded_to_the_host() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let script = r#"
read -r line
printf '{"method":"ready"}\n'
read -r input
case "$input" in
  *'"method":"input"'*'"key":"Enter"'*) printf '{"method":"console","params":{"text":"input received"}}\n' ;;
  *) printf '{"method":"console","params":{"text":"bad input"}}\n' ;;
esac
read -r never
"#;
    let (ctl, mut rx) = controller(host(script, 5000, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");
    assert_eq!(next_event(&mut rx).await.kind, EventKind::Ready);

    ctl.send_input(&instance, serde_json::json!({"key": "Enter"}))
        .await
        .expect("input sent");
    assert_eq!(console_text(&mut rx).await, "input received");
    ctl.destroy(&instance);
}

#[tokio::test]
async fn exit_before_ready_is_a_boundary_failure() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let (ctl, mut rx) = controller(host("read -r line; exit 3", 5000, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");

    let event = next_event(&mut rx).await;
    assert_eq!(
        event.kind,
        EventKind::Fatal {
            reason: "process exited with code 3 before ready".into()
        }
    );
    assert_eq!(instance.state(), InstanceState::Failed);
    wait_until_empty(scratch.path()).await;
}

#[tokio::test]
async fn unresponsive_host_is_killed_after_budget() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let (ctl, mut rx) = controller(host("read -r line; read -r never", 300, scratch.path()));
    let instance = ctl.create();
    ctl.load(&instance, artifact()).await.expect("load");

    let event = next_event(&mut rx).await;
    assert_eq!(
        event.kind,
        EventKind::Fatal {
            reason: "timeout".into()
        }
    );
    assert!(instance.is_terminated());
    wait_until_empty(scratch.path()).await;
}

#[tokio::test]
async fn missing_host_program_fails_the_launch() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let config = SandboxConfig {
        runtime_program: "/nonexistent/preview-host".into(),
        ..host("", 5000, scratch.path())
    };
    let (ctl, mut rx) = controller(config);
    let instance = ctl.create();

    let err = ctl.load(&instance, artifact()).await.expect_err("spawn fails");
    assert!(matches!(err, AppError::Sandbox(ref msg) if msg.contains("failed to spawn preview host")));

    let event = next_event(&mut rx).await;
    assert!(matches!(
        event.kind,
        EventKind::Fatal { ref reason } if reason.starts_with("execution environment failed")
    ));
    wait_until_empty(scratch.path()).await;
}
