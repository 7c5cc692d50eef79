//! End-to-end session flows over the scripted isolation backend.
//!
//! Time-sensitive tests run on a paused tokio clock so debounce windows and
//! execution budgets elapse deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use live_preview::models::diagnostic::DiagnosticSource;
use live_preview::models::result::{ExecutionResult, SessionState, Settlement, Viewport};
use live_preview::models::source::SourceUnit;
use live_preview::transform::component::NO_ENTRY;
use live_preview::transform::registry::UNSUPPORTED_FOR_LIVE;
use live_preview::AppError;

use super::test_helpers::{
    scripted_session, wait_for_settle, HANG, LATE, LATE_DELAY, LAUNCH_FAIL, RUNAWAY, THROW,
};

fn console_texts(result: &ExecutionResult) -> Vec<&str> {
    result.console_lines.iter().map(|l| l.text.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_collapse_into_one_generation() {
    let (session, isolation) = scripted_session(500, 5000);

    session.submit("<p>one</p>", "html").expect("submit");
    tokio::time::sleep(Duration::from_millis(40)).await;
    session.submit("<p>two</p>", "html").expect("submit");
    tokio::time::sleep(Duration::from_millis(40)).await;
    session.submit("<p>three</p>", "html").expect("submit");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.generation, 1);
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));
    assert!(result.rendered.as_deref().is_some_and(|d| d.contains("<p>three</p>")));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.generation(), 1);
    let launches = isolation.launches();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].document.contains("<p>three</p>"));
}

#[tokio::test(start_paused = true)]
async fn edit_arms_pending_until_debounce_elapses() {
    let (session, isolation) = scripted_session(500, 5000);

    session.submit("<p>x</p>", "html").expect("submit");
    let mut rx = session.watch();
    rx.wait_for(|s| s.state == SessionState::Pending)
        .await
        .expect("pending published");

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(session.generation(), 0, "debounce window not yet elapsed");
    assert!(isolation.launches().is_empty());

    wait_for_settle(&session, 1).await;
    assert_eq!(session.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_edit_within_window_uses_latest_text() {
    let (session, isolation) = scripted_session(500, 5000);

    session.submit("<b>first</b>", "html").expect("submit");
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.submit("<b>second</b>", "html").expect("submit");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.generation, 1);
    assert_eq!(isolation.launches().len(), 1);
    let rendered = result.rendered.expect("rendered document");
    assert!(rendered.contains("<b>second</b>"));
    assert!(!rendered.contains("first"));
}

#[tokio::test(start_paused = true)]
async fn markup_settles_ready_with_rendered_document() {
    let (session, _isolation) = scripted_session(100, 5000);

    session.submit("<h1>Hi</h1>", "markup").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));
    assert!(result.instance_id.is_some());
    assert!(!result.has_errors());
    assert!(result.fatal_error.is_none());
    assert!(result.completed_at.is_some());
    assert!(result.rendered.as_deref().is_some_and(|d| d.contains("<h1>Hi</h1>")));
    assert_eq!(console_texts(&result), ["ran"]);
}

#[tokio::test(start_paused = true)]
async fn superseded_generation_events_never_surface() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit(format!("<p>{LATE}</p>"), "html").expect("submit");
    session.force_refresh().expect("refresh");
    let mut rx = session.watch();
    rx.wait_for(|s| s.generation == 1 && s.state == SessionState::Running)
        .await
        .expect("first generation running");

    session.submit("<p>fresh</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    let result = wait_for_settle(&session, 2).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));

    tokio::time::sleep(LATE_DELAY * 3).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.state, SessionState::Settled(Settlement::Ready));
    assert_eq!(console_texts(&snapshot), ["ran"]);
    assert_eq!(isolation.launches().len(), 2);
    assert_ne!(
        Some(isolation.launches()[0].instance_id),
        snapshot.instance_id,
        "result belongs to the newest instance"
    );
}

#[tokio::test(start_paused = true)]
async fn exceeded_budget_settles_with_timeout_then_recovers() {
    let (session, _isolation) = scripted_session(100, 1000);

    let started = Instant::now();
    session.submit(format!("<p>{HANG}</p>"), "html").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "fired at {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "fired at {elapsed:?}");

    assert_eq!(result.state, SessionState::Settled(Settlement::Error));
    assert!(result.fatal_error.as_ref().is_some_and(|f| f.is_timeout()));
    assert_eq!(console_texts(&result), ["started"], "partial output is kept");
    assert_eq!(result.user_message(), Some("execution environment failed, retry"));

    session.submit("<p>ok</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    let result = wait_for_settle(&session, 2).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));
    assert!(result.fatal_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn instance_silent_after_ready_times_out() {
    let (session, _isolation) = scripted_session(100, 1000);

    session.submit(format!("<p>{RUNAWAY}</p>"), "html").expect("submit");
    session.force_refresh().expect("refresh");
    let ready = wait_for_settle(&session, 1).await;
    assert_eq!(ready.state, SessionState::Settled(Settlement::Ready));

    let started = Instant::now();
    let mut rx = session.watch();
    let failed = tokio::time::timeout(Duration::from_secs(60), async move {
        let failed = rx
            .wait_for(|snap| snap.fatal_error.is_some())
            .await
            .expect("session still running")
            .clone();
        failed
    })
    .await
    .expect("liveness window elapsed");

    assert!(started.elapsed() >= Duration::from_secs(9), "fired at {:?}", started.elapsed());
    assert_eq!(failed.generation, 1);
    assert_eq!(failed.state, SessionState::Settled(Settlement::Error));
    assert!(failed.fatal_error.as_ref().is_some_and(|f| f.is_timeout()));
}

#[tokio::test(start_paused = true)]
async fn heartbeating_instance_stays_ready() {
    let (session, _isolation) = scripted_session(100, 1000);

    session.submit("<p>ok</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    let result = session.snapshot();
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));
    assert!(result.fatal_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn runtime_exception_settles_error() {
    let (session, _isolation) = scripted_session(100, 5000);

    session.submit(format!("throw new Error('{THROW}');"), "js").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Error));
    assert!(result.fatal_error.is_none());
    let runtime: Vec<_> = result.runtime_errors().collect();
    assert_eq!(runtime.len(), 1);
    assert_eq!(runtime[0].message, "boom");
    assert_eq!(runtime[0].stack.as_deref(), Some("at <anonymous>:1:1"));
    assert_eq!(result.user_message(), Some("your code threw an exception"));
}

#[tokio::test(start_paused = true)]
async fn launch_failure_is_reported_as_boundary_failure() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit(format!("<p>{LAUNCH_FAIL}</p>"), "html").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Error));
    let fatal = result.fatal_error.expect("fatal error");
    assert!(fatal.reason.starts_with("execution environment failed"));
    assert!(isolation.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn component_without_entry_never_reaches_sandbox() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit("const x = 1;\n", "component-ui").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Error));
    assert!(result.instance_id.is_none());
    assert!(result.rendered.is_none());
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.source == DiagnosticSource::Transform && d.message.contains(NO_ENTRY)));
    assert_eq!(result.user_message(), Some("could not prepare your code for preview"));
    assert!(isolation.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn languages_without_runtime_settle_with_delegation_notice() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit("print('hi')", "python").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Error));
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.message.contains(UNSUPPORTED_FOR_LIVE)));
    assert!(isolation.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn validator_warnings_do_not_block_execution() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit("<div><span>text</div></p>", "html").expect("submit");
    session.force_refresh().expect("refresh");

    let result = wait_for_settle(&session, 1).await;
    assert_eq!(isolation.launches().len(), 1);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.source == DiagnosticSource::Validator));
}

#[tokio::test(start_paused = true)]
async fn refresh_without_source_is_a_no_op() {
    let (session, isolation) = scripted_session(100, 5000);

    session.force_refresh().expect("refresh");
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(uuid::Uuid::parse_str(session.session_id()).is_ok());
    assert_eq!(session.generation(), 0);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(isolation.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn viewport_changes_do_not_start_generations() {
    let (session, isolation) = scripted_session(100, 5000);

    session.submit("<p>x</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;

    session.set_viewport(375, 667).expect("viewport");
    let mut rx = session.watch();
    let snapshot = rx
        .wait_for(|s| s.viewport.is_some())
        .await
        .expect("viewport published")
        .clone();

    assert_eq!(
        snapshot.viewport,
        Some(Viewport {
            width: 375,
            height: 667
        })
    );
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.state, SessionState::Settled(Settlement::Ready));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(session.generation(), 1);
    assert_eq!(isolation.launches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribers_receive_settled_results_until_unsubscribed() {
    let (session, _isolation) = scripted_session(100, 5000);
    let seen: Arc<Mutex<Vec<ExecutionResult>>> = Arc::default();

    let sink = Arc::clone(&seen);
    let subscription = session.subscribe(move |result| {
        if result.state.is_settled() {
            sink.lock().expect("sink").push(result.clone());
        }
    });

    session.submit("<p>a</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;
    assert_eq!(seen.lock().expect("sink").len(), 1);
    assert_eq!(seen.lock().expect("sink")[0].generation, 1);

    subscription.unsubscribe();

    session.submit("<p>b</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 2).await;
    assert_eq!(seen.lock().expect("sink").len(), 1, "no pushes after unsubscribe");
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_does_not_stop_others() {
    let (session, _isolation) = scripted_session(100, 5000);
    let count = Arc::new(Mutex::new(0u32));

    let _bad = session.subscribe(|_| panic!("subscriber bug"));
    let sink = Arc::clone(&count);
    let _good = session.subscribe(move |result| {
        if result.state.is_settled() {
            *sink.lock().expect("count") += 1;
        }
    });

    session.submit("<p>a</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;
    assert_eq!(*count.lock().expect("count"), 1);
}

#[tokio::test(start_paused = true)]
async fn input_reaches_the_running_instance() {
    let (session, _isolation) = scripted_session(100, 5000);

    let err = session
        .send_input(serde_json::json!({"key": "a"}))
        .await
        .expect_err("nothing running yet");
    assert!(matches!(err, AppError::Sandbox(_)));

    session.submit("<button>go</button>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;

    session
        .send_input(serde_json::json!({"key": "Enter"}))
        .await
        .expect("input delivered");

    let mut rx = session.watch();
    let snapshot = rx
        .wait_for(|s| s.console_lines.iter().any(|l| l.level == "input"))
        .await
        .expect("echo published")
        .clone();
    let echoed = snapshot
        .console_lines
        .iter()
        .find(|l| l.level == "input")
        .expect("echo line");
    assert!(echoed.text.contains("Enter"));
}

#[tokio::test(start_paused = true)]
async fn dispose_is_idempotent_and_rejects_further_calls() {
    let (session, _isolation) = scripted_session(100, 5000);

    session.submit("<p>x</p>", "html").expect("submit");
    session.force_refresh().expect("refresh");
    wait_for_settle(&session, 1).await;

    session.dispose();
    session.dispose();
    assert!(session.is_disposed());

    assert!(matches!(session.submit("<p>y</p>", "html"), Err(AppError::Disposed(_))));
    assert!(matches!(session.force_refresh(), Err(AppError::Disposed(_))));
    assert!(matches!(session.set_viewport(1, 1), Err(AppError::Disposed(_))));
    assert!(matches!(
        session.send_input(serde_json::json!(null)).await,
        Err(AppError::Disposed(_))
    ));

    assert_eq!(session.snapshot().generation, 1, "last snapshot stays readable");
}

#[tokio::test(start_paused = true)]
async fn dispose_while_pending_cancels_the_generation() {
    let (session, isolation) = scripted_session(500, 5000);

    session.submit("<p>x</p>", "html").expect("submit");
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.dispose();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(session.generation(), 0);
    assert!(isolation.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn source_units_are_accepted() {
    let (session, isolation) = scripted_session(100, 5000);
    let unit = SourceUnit::new("body { margin: 0; }", "css").with_path("styles/site.css");

    session.submit_unit(&unit).expect("submit");
    let result = wait_for_settle(&session, 1).await;
    assert_eq!(result.state, SessionState::Settled(Settlement::Ready));
    assert!(isolation.launches()[0].document.contains("body { margin: 0; }"));
}
