//! Channel reader tasks.
//!
//! [`run_reader`] drives a [`FramedRead`] over the preview host's stdout,
//! parses every line with [`parse_inbound_line`], and forwards the resulting
//! event kinds. [`run_stderr_reader`] surfaces the host's stderr as
//! `console` events with level `stderr`.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::codec::ChannelCodec;
use crate::channel::parse_inbound_line;
use crate::models::event::{EventKind, InstanceId};
use crate::AppError;

/// How a reader task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stream reached EOF.
    Eof,
    /// The cancellation token fired.
    Cancelled,
    /// The event receiver was dropped.
    Closed,
    /// An unrecoverable I/O error occurred.
    Failed(String),
}

/// Read NDJSON messages from `stdout` until EOF, cancellation, or an I/O
/// error.
///
/// Malformed, oversize, and unknown lines are logged and skipped; they never
/// stop the reader.
pub async fn run_reader<R>(
    instance_id: InstanceId,
    stdout: R,
    event_tx: mpsc::Sender<EventKind>,
    cancel: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, ChannelCodec::new());
    // After a decoder error `FramedRead` yields one `None`, then resumes.
    let mut recovering = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%instance_id, "channel reader: cancellation received, stopping");
                return ReaderExit::Cancelled;
            }

            item = framed.next() => {
                match item {
                    None if recovering => recovering = false,

                    None => {
                        debug!(%instance_id, "channel reader: EOF detected");
                        return ReaderExit::Eof;
                    }

                    Some(Err(AppError::Channel(ref msg))) => {
                        recovering = true;
                        warn!(
                            %instance_id,
                            error = msg.as_str(),
                            "channel reader: framing error, skipping"
                        );
                    }

                    Some(Err(e)) => {
                        warn!(%instance_id, error = %e, "channel reader: IO error, stopping");
                        return ReaderExit::Failed(e.to_string());
                    }

                    Some(Ok(line)) => match parse_inbound_line(instance_id, &line) {
                        Ok(Some(kind)) => {
                            if event_tx.send(kind).await.is_err() {
                                debug!(%instance_id, "channel reader: event_tx closed, stopping");
                                return ReaderExit::Closed;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                %instance_id,
                                error = %e,
                                raw_line = %line,
                                "channel reader: parse error, skipping line"
                            );
                        }
                    },
                }
            }
        }
    }
}

/// Forward every stderr line as a `console` event with level `stderr`.
pub async fn run_stderr_reader<R>(
    instance_id: InstanceId,
    stderr: R,
    event_tx: mpsc::Sender<EventKind>,
    cancel: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stderr, ChannelCodec::new());
    let mut recovering = false;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return ReaderExit::Cancelled,

            item = framed.next() => {
                match item {
                    None if recovering => recovering = false,
                    None => return ReaderExit::Eof,
                    Some(Err(AppError::Channel(_))) => recovering = true,
                    Some(Err(e)) => return ReaderExit::Failed(e.to_string()),
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let kind = EventKind::Console {
                            level: "stderr".into(),
                            text: line,
                        };
                        if event_tx.send(kind).await.is_err() {
                            return ReaderExit::Closed;
                        }
                    }
                }
            }
        }
    }
}
