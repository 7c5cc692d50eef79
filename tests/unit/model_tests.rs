//! Unit tests for domain models: tags, events, diagnostics, results.

use live_preview::models::artifact::Artifact;
use live_preview::models::diagnostic::{Diagnostic, DiagnosticSource, Severity};
use live_preview::models::event::{EventKind, ExecutionEvent, InstanceId};
use live_preview::models::result::{ExecutionResult, FatalError, SessionState, Settlement};
use live_preview::models::source::{LanguageFamily, LanguageTag};

#[test]
fn language_tags_are_case_insensitive() {
    assert_eq!(LanguageTag::new("  HTML "), LanguageTag::new("html"));
    assert_eq!(LanguageTag::new("TSX").family(), LanguageFamily::TypedComponentUi);
}

#[test]
fn language_aliases_resolve_to_families() {
    let cases = [
        ("js", LanguageFamily::Script),
        ("javascript", LanguageFamily::Script),
        ("markup", LanguageFamily::Markup),
        ("css", LanguageFamily::Style),
        ("component-ui", LanguageFamily::ComponentUi),
        ("react", LanguageFamily::ComponentUi),
        ("typescript", LanguageFamily::TypedScript),
        ("json", LanguageFamily::Data),
        ("python", LanguageFamily::NoRuntime),
        ("rust", LanguageFamily::NoRuntime),
        ("cobol-ish", LanguageFamily::Unknown),
    ];
    for (tag, family) in cases {
        assert_eq!(LanguageTag::new(tag).family(), family, "tag {tag}");
    }
}

#[test]
fn instance_id_displays_with_prefix() {
    assert_eq!(InstanceId(7).to_string(), "sbx-7");
    assert_eq!(InstanceId(7).get(), 7);
}

#[test]
fn execution_event_serializes_flat() {
    let event = ExecutionEvent {
        instance_id: InstanceId(3),
        sequence: 2,
        kind: EventKind::Console {
            level: "info".into(),
            text: "hello".into(),
        },
    };
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["instance_id"], 3);
    assert_eq!(json["sequence"], 2);
    assert_eq!(json["kind"], "console");
    assert_eq!(json["text"], "hello");
    assert!(!event.is_fatal());
}

#[test]
fn diagnostic_constructors_set_source_and_severity() {
    let v = Diagnostic::warning("w").at(2, 5);
    assert_eq!(v.severity, Severity::Warning);
    assert_eq!(v.source, DiagnosticSource::Validator);
    assert_eq!((v.line, v.column), (Some(2), Some(5)));

    let t = Diagnostic::transform("t");
    assert!(t.is_error());
    assert_eq!(t.source, DiagnosticSource::Transform);

    let r = Diagnostic::runtime("boom", Some("at main".into()));
    assert_eq!(r.source, DiagnosticSource::Runtime);
    assert_eq!(r.stack.as_deref(), Some("at main"));
}

#[test]
fn artifact_digest_is_stable_sha256_hex() {
    let artifact = Artifact {
        language_tag: LanguageTag::new("html"),
        executable_document: String::new(),
    };
    assert_eq!(
        artifact.digest(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn default_result_is_idle() {
    let result = ExecutionResult::default();
    assert_eq!(result.state, SessionState::Idle);
    assert_eq!(result.generation, 0);
    assert!(!result.has_errors());
    assert!(result.user_message().is_none());
}

#[test]
fn user_message_distinguishes_failure_kinds() {
    let fatal = ExecutionResult {
        fatal_error: Some(FatalError {
            reason: "timeout".into(),
        }),
        diagnostics: vec![Diagnostic::runtime("boom", None)],
        ..ExecutionResult::default()
    };
    assert_eq!(fatal.user_message(), Some("execution environment failed, retry"));
    assert!(fatal.fatal_error.as_ref().is_some_and(FatalError::is_timeout));

    let runtime = ExecutionResult {
        diagnostics: vec![Diagnostic::runtime("boom", None)],
        ..ExecutionResult::default()
    };
    assert_eq!(runtime.user_message(), Some("your code threw an exception"));

    let transform = ExecutionResult {
        diagnostics: vec![Diagnostic::transform("no component export found")],
        ..ExecutionResult::default()
    };
    assert_eq!(
        transform.user_message(),
        Some("could not prepare your code for preview")
    );

    let warnings_only = ExecutionResult {
        diagnostics: vec![Diagnostic::warning("stray closing tag `</p>`")],
        ..ExecutionResult::default()
    };
    assert!(warnings_only.user_message().is_none());
    assert!(!warnings_only.has_errors());
}

#[test]
fn settled_state_serializes_in_snake_case() {
    let json = serde_json::to_value(SessionState::Settled(Settlement::Ready)).expect("serialize");
    assert_eq!(json, serde_json::json!({ "settled": "ready" }));
    assert!(SessionState::Settled(Settlement::Error).is_settled());
    assert!(!SessionState::Running.is_settled());
}
