//! Sandbox controller lifecycle tests over the scripted isolation backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use live_preview::config::SandboxConfig;
use live_preview::models::artifact::Artifact;
use live_preview::models::event::{EventKind, ExecutionEvent};
use live_preview::models::source::LanguageTag;
use live_preview::sandbox::{InstanceState, SandboxController};
use live_preview::AppError;

use super::test_helpers::{ScriptedIsolation, HANG, LAUNCH_FAIL, RUNAWAY};

fn artifact(document: &str) -> Artifact {
    Artifact {
        language_tag: LanguageTag::new("html"),
        executable_document: document.to_owned(),
    }
}

fn controller(budget_ms: u64) -> (SandboxController, mpsc::Receiver<ExecutionEvent>, Arc<ScriptedIsolation>) {
    let isolation = ScriptedIsolation::shared();
    let (tx, rx) = mpsc::channel(32);
    let config = SandboxConfig {
        execution_budget_ms: budget_ms,
        startup_timeout_ms: 1000,
        ..SandboxConfig::default()
    };
    (SandboxController::new(config, isolation.clone(), tx), rx, isolation)
}

#[tokio::test]
async fn instance_ids_are_never_reused() {
    let (ctl, _rx, _iso) = controller(5000);
    let a = ctl.create();
    let b = ctl.create();
    ctl.destroy(&a);
    let c = ctl.create();

    assert!(b.instance_id() > a.instance_id());
    assert!(c.instance_id() > b.instance_id());
    assert_eq!(c.state(), InstanceState::Created);
    assert!(c.created_at() >= a.created_at());
}

#[tokio::test]
async fn events_are_sequenced_from_one() {
    let (ctl, mut rx, iso) = controller(5000);
    let instance = ctl.create();
    ctl.load(&instance, artifact("<p>x</p>")).await.expect("load");

    let first = rx.recv().await.expect("console");
    let second = rx.recv().await.expect("ready");
    assert_eq!(first.instance_id, instance.instance_id());
    assert_eq!(first.sequence, 1);
    assert!(matches!(first.kind, EventKind::Console { .. }));
    assert_eq!(second.sequence, 2);
    assert_eq!(second.kind, EventKind::Ready);

    tokio::task::yield_now().await;
    assert_eq!(instance.state(), InstanceState::Running);
    assert_eq!(iso.launches().len(), 1);
}

#[tokio::test]
async fn an_instance_loads_only_once() {
    let (ctl, _rx, _iso) = controller(5000);
    let instance = ctl.create();
    ctl.load(&instance, artifact("<p>x</p>")).await.expect("first load");

    let err = ctl
        .load(&instance, artifact("<p>y</p>"))
        .await
        .expect_err("second load rejected");
    assert!(matches!(err, AppError::Sandbox(_)));

    ctl.destroy(&instance);
    let err = ctl
        .load(&instance, artifact("<p>z</p>"))
        .await
        .expect_err("destroyed instance rejected");
    assert!(matches!(err, AppError::Sandbox(_)));
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let (ctl, _rx, _iso) = controller(5000);
    let instance = ctl.create();
    ctl.load(&instance, artifact(HANG)).await.expect("load");

    ctl.destroy(&instance);
    ctl.destroy(&instance);
    assert_eq!(instance.state(), InstanceState::Destroyed);
    assert!(instance.is_terminated());

    let never_loaded = ctl.create();
    ctl.destroy(&never_loaded);
    ctl.destroy(&never_loaded);
    assert_eq!(never_loaded.state(), InstanceState::Destroyed);
}

#[tokio::test]
async fn destroyed_instance_emits_nothing_further() {
    let (ctl, mut rx, _iso) = controller(5000);
    let instance = ctl.create();
    ctl.load(&instance, artifact(HANG)).await.expect("load");

    let started = rx.recv().await.expect("started");
    assert!(matches!(started.kind, EventKind::Console { .. }));

    ctl.destroy(&instance);
    let next = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(next.is_err(), "no event after destroy: {next:?}");
}

#[tokio::test]
async fn launch_failure_is_returned_and_emitted() {
    let (ctl, mut rx, _iso) = controller(5000);
    let instance = ctl.create();

    let err = ctl
        .load(&instance, artifact(LAUNCH_FAIL))
        .await
        .expect_err("launch fails");
    assert!(matches!(err, AppError::Sandbox(_)));

    let event = rx.recv().await.expect("fatal event");
    let EventKind::Fatal { reason } = event.kind else {
        panic!("expected fatal, got {:?}", event.kind);
    };
    assert!(reason.starts_with("execution environment failed"));

    tokio::task::yield_now().await;
    assert_eq!(instance.state(), InstanceState::Failed);
}

#[tokio::test(start_paused = true)]
async fn watchdog_fails_instances_that_never_become_ready() {
    let (ctl, mut rx, _iso) = controller(2000);
    let instance = ctl.create();
    ctl.load(&instance, artifact(HANG)).await.expect("load");

    let _started = rx.recv().await.expect("started");
    let fatal = rx.recv().await.expect("fatal");
    assert_eq!(fatal.sequence, 2);
    assert_eq!(
        fatal.kind,
        EventKind::Fatal {
            reason: "timeout".into()
        }
    );

    tokio::task::yield_now().await;
    assert_eq!(instance.state(), InstanceState::Failed);
    assert!(instance.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_a_ready_instance_alive() {
    let (ctl, mut rx, _iso) = controller(1000);
    let instance = ctl.create();
    ctl.load(&instance, artifact("<p>x</p>")).await.expect("load");

    rx.recv().await.expect("console");
    rx.recv().await.expect("ready");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(rx.try_recv().is_err(), "heartbeats are not delivered and nothing times out");
    assert_eq!(instance.state(), InstanceState::Running);
}

#[tokio::test(start_paused = true)]
async fn silence_after_ready_is_a_timeout() {
    let (ctl, mut rx, _iso) = controller(1000);
    let instance = ctl.create();
    ctl.load(&instance, artifact(RUNAWAY)).await.expect("load");

    let ready = rx.recv().await.expect("ready");
    assert_eq!(ready.kind, EventKind::Ready);
    let started = tokio::time::Instant::now();

    let fatal = rx.recv().await.expect("fatal");
    assert!(started.elapsed() >= Duration::from_secs(9));
    assert_eq!(fatal.sequence, 2);
    assert_eq!(
        fatal.kind,
        EventKind::Fatal {
            reason: "timeout".into()
        }
    );

    tokio::task::yield_now().await;
    assert_eq!(instance.state(), InstanceState::Failed);
}

#[tokio::test(start_paused = true)]
async fn liveness_check_can_be_disabled() {
    let isolation = ScriptedIsolation::shared();
    let (tx, mut rx) = mpsc::channel(32);
    let config = SandboxConfig {
        execution_budget_ms: 1000,
        liveness_timeout_ms: 0,
        ..SandboxConfig::default()
    };
    let ctl = SandboxController::new(config, isolation, tx);
    let instance = ctl.create();
    ctl.load(&instance, artifact(RUNAWAY)).await.expect("load");

    rx.recv().await.expect("ready");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(instance.state(), InstanceState::Running);
}

#[tokio::test]
async fn input_requires_a_loaded_instance() {
    let (ctl, mut rx, _iso) = controller(5000);
    let instance = ctl.create();

    let err = ctl
        .send_input(&instance, serde_json::json!(1))
        .await
        .expect_err("not loaded");
    assert!(matches!(err, AppError::Sandbox(_)));

    ctl.load(&instance, artifact("<p>x</p>")).await.expect("load");
    rx.recv().await.expect("console");
    rx.recv().await.expect("ready");

    ctl.send_input(&instance, serde_json::json!({"n": 7}))
        .await
        .expect("input accepted");
    let echo = rx.recv().await.expect("echo");
    assert_eq!(echo.sequence, 3);
    assert!(matches!(echo.kind, EventKind::Console { ref level, ref text } if level == "input" && text.contains('7')));

    ctl.destroy(&instance);
    assert!(ctl.send_input(&instance, serde_json::json!(2)).await.is_err());
}
