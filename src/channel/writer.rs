//! Channel writer task.
//!
//! Serializes [`ControlMessage`]s received over an [`mpsc`] channel and
//! writes them as NDJSON lines to the preview host's stdin.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{encode_control, ControlMessage};
use crate::models::event::InstanceId;
use crate::{AppError, Result};

/// Write control messages to `stdin` until cancellation or until every
/// sender is dropped.
///
/// # Errors
///
/// Returns [`AppError::Channel`] when serialization or the write fails,
/// for example because the preview host has exited.
pub async fn run_writer<W>(
    instance_id: InstanceId,
    mut stdin: W,
    mut msg_rx: mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%instance_id, "channel writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(message) = msg else {
                    debug!(%instance_id, "channel writer: message channel closed, stopping");
                    break;
                };
                let bytes = encode_control(&message)?;
                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(%instance_id, error = %e, "channel writer: write to stdin failed");
                    AppError::Channel(format!("write failed: {e}"))
                })?;
                stdin.flush().await.map_err(|e| AppError::Channel(format!("flush failed: {e}")))?;
            }
        }
    }

    Ok(())
}
