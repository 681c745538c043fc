//! Frame writer task.
//!
//! The writer task is the only owner of the output stream. Callers hand it
//! already-serialized frames through an [`mpsc`] channel, so concurrent
//! callers can never interleave partial frames on the wire.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::FrameCodec;
use crate::{AppError, Result};

/// Writer task: drain `frame_rx` and write each frame as one line.
///
/// Every frame is flushed before the next one is taken from the channel.
///
/// The task exits cleanly when `cancel` fires or every sender is dropped.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when a write or flush fails (typically
/// because the peer closed its input). Returns [`AppError::Protocol`] if a
/// frame contains a raw newline.
pub async fn run_writer<W>(
    peer: String,
    output: W,
    mut frame_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(output, FrameCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer, "rpc writer: cancellation received, stopping");
                break;
            }

            frame = frame_rx.recv() => {
                let Some(line) = frame else {
                    debug!(peer, "rpc writer: frame channel closed, stopping");
                    break;
                };

                framed.send(line).await.map_err(|e| {
                    warn!(peer, error = %e, "rpc writer: write failed");
                    match e {
                        AppError::Transport(msg) => AppError::Transport(format!("write failed: {msg}")),
                        other => other,
                    }
                })?;
            }
        }
    }

    // Best effort: push out anything the codec still buffers.
    if let Err(e) = framed.close().await {
        debug!(peer, error = %e, "rpc writer: close after shutdown failed");
    }

    Ok(())
}
