//! Unit tests for the execution channel: codec, inbound parsing, outbound
//! encoding, and the reader/writer tasks.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use live_preview::channel::codec::{ChannelCodec, MAX_LINE_BYTES};
use live_preview::channel::reader::{run_reader, run_stderr_reader, ReaderExit};
use live_preview::channel::writer::run_writer;
use live_preview::channel::{encode_control, parse_inbound_line, ControlMessage};
use live_preview::models::event::{EventKind, InstanceId};
use live_preview::AppError;

const ID: InstanceId = InstanceId(1);

#[test]
fn codec_splits_batched_lines_and_buffers_partials() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"ready\"}\n{\"method\":\"con");

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("{\"method\":\"ready\"}".to_owned())
    );
    assert_eq!(codec.decode(&mut buf).expect("partial"), None);

    buf.extend_from_slice(b"sole\"}\n");
    assert_eq!(
        codec.decode(&mut buf).expect("completed"),
        Some("{\"method\":\"console\"}".to_owned())
    );
}

#[test]
fn codec_rejects_oversize_lines() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_BYTES + 1].as_slice());
    let err = codec.decode(&mut buf).expect_err("line too long");
    assert!(matches!(err, AppError::Channel(ref msg) if msg.starts_with("line too long")));
}

#[test]
fn parses_every_inbound_method() {
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"console","params":{"level":"warn","text":"hi"}}"#)
            .expect("console"),
        Some(EventKind::Console {
            level: "warn".into(),
            text: "hi".into()
        })
    );
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"console","params":{"text":"plain"}}"#)
            .expect("console default level"),
        Some(EventKind::Console {
            level: "log".into(),
            text: "plain".into()
        })
    );
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"error","params":{"message":"boom","stack":"at x"}}"#)
            .expect("error"),
        Some(EventKind::Error {
            message: "boom".into(),
            stack: Some("at x".into())
        })
    );
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"ready"}"#).expect("ready"),
        Some(EventKind::Ready)
    );
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"heartbeat","params":{}}"#).expect("heartbeat"),
        Some(EventKind::Heartbeat)
    );
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"fatal","params":{"reason":"oom"}}"#).expect("fatal"),
        Some(EventKind::Fatal {
            reason: "oom".into()
        })
    );
}

#[test]
fn blank_and_unknown_lines_are_skipped() {
    assert_eq!(parse_inbound_line(ID, "   ").expect("blank"), None);
    assert_eq!(
        parse_inbound_line(ID, r#"{"method":"telemetry","params":{}}"#).expect("unknown"),
        None
    );
}

#[test]
fn malformed_and_incomplete_lines_are_errors() {
    let err = parse_inbound_line(ID, "{not json").expect_err("malformed");
    assert!(matches!(err, AppError::Channel(ref msg) if msg.starts_with("malformed json")));

    let err = parse_inbound_line(ID, r#"{"method":"fatal","params":{}}"#).expect_err("no reason");
    assert!(matches!(err, AppError::Channel(ref msg) if msg.contains("invalid fatal params")));
}

#[test]
fn control_messages_encode_as_ndjson() {
    let load = ControlMessage::Load {
        instance_id: 4,
        language: "html".into(),
        document: "<p>x</p>".into(),
    };
    let bytes = encode_control(&load).expect("encode");
    assert_eq!(bytes.last(), Some(&b'\n'));
    let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(value["method"], "load");
    assert_eq!(value["params"]["instance_id"], 4);
    assert_eq!(value["params"]["document"], "<p>x</p>");

    let input = ControlMessage::Input {
        payload: serde_json::json!({"key": "Enter"}),
    };
    let value: serde_json::Value =
        serde_json::from_slice(&encode_control(&input).expect("encode")).expect("json");
    assert_eq!(value["method"], "input");
    assert_eq!(value["params"]["payload"]["key"], "Enter");
}

#[tokio::test]
async fn reader_forwards_events_in_order_and_skips_garbage() {
    let stream = concat!(
        "{\"method\":\"console\",\"params\":{\"text\":\"one\"}}\n",
        "garbage\n",
        "\n",
        "{\"method\":\"mystery\"}\n",
        "{\"method\":\"ready\"}\n",
    );
    let (tx, mut rx) = mpsc::channel(8);

    let exit = run_reader(ID, stream.as_bytes(), tx, CancellationToken::new()).await;
    assert_eq!(exit, ReaderExit::Eof);

    assert_eq!(
        rx.recv().await,
        Some(EventKind::Console {
            level: "log".into(),
            text: "one".into()
        })
    );
    assert_eq!(rx.recv().await, Some(EventKind::Ready));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn reader_survives_oversize_line() {
    let mut stream = vec![b'x'; MAX_LINE_BYTES + 10];
    stream.extend_from_slice(b"\n{\"method\":\"ready\"}\n");
    let (tx, mut rx) = mpsc::channel(8);

    let exit = run_reader(ID, stream.as_slice(), tx, CancellationToken::new()).await;
    assert_eq!(exit, ReaderExit::Eof);
    assert_eq!(rx.recv().await, Some(EventKind::Ready));
}

#[tokio::test]
async fn reader_stops_on_cancellation() {
    let (_host, sandbox_stdout) = tokio::io::duplex(64);
    let (tx, _rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let exit = run_reader(ID, sandbox_stdout, tx, cancel).await;
    assert_eq!(exit, ReaderExit::Cancelled);
}

#[tokio::test]
async fn reader_reports_closed_receiver() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let exit = run_reader(
        ID,
        "{\"method\":\"ready\"}\n".as_bytes(),
        tx,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(exit, ReaderExit::Closed);
}

#[tokio::test]
async fn stderr_lines_become_console_events() {
    let (tx, mut rx) = mpsc::channel(8);
    let exit = run_stderr_reader(ID, "warning: x\n\n".as_bytes(), tx, CancellationToken::new()).await;
    assert_eq!(exit, ReaderExit::Eof);
    assert_eq!(
        rx.recv().await,
        Some(EventKind::Console {
            level: "stderr".into(),
            text: "warning: x".into()
        })
    );
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn writer_emits_one_line_per_message() {
    let (stdin, mut host_side) = tokio::io::duplex(4096);
    let (tx, rx) = mpsc::channel(4);

    tx.send(ControlMessage::Input {
        payload: serde_json::json!(1),
    })
    .await
    .expect("send");
    tx.send(ControlMessage::Input {
        payload: serde_json::json!(2),
    })
    .await
    .expect("send");
    drop(tx);

    run_writer(ID, stdin, rx, CancellationToken::new())
        .await
        .expect("writer finishes cleanly");

    let mut written = String::new();
    host_side.read_to_string(&mut written).await.expect("read");
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"payload\":1"));
    assert!(lines[1].contains("\"payload\":2"));
}
