//! Frame reader task.
//!
//! Drains the input stream for the lifetime of the connection, decodes each
//! line, and hands the result to the [`Correlator`]. A corrupt line is
//! logged and skipped; only EOF, an I/O error, or cancellation end the loop.
//!
//! Whatever ends the loop, the correlator is closed on the way out so that
//! no caller waits forever for a response that cannot arrive.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::{FrameCodec, InboundLine};
use crate::rpc::correlator::Correlator;
use crate::rpc::Frame;
use crate::{AppError, Result};

/// Reason recorded on pending calls when the reader is cancelled.
pub const SHUTDOWN_REASON: &str = "connection shut down";

/// Decode one line into a [`Frame`].
///
/// - `Ok(None)`: blank line, skipped.
/// - `Ok(Some(frame))`: valid JSON, classified.
///
/// # Errors
///
/// Returns [`AppError::Protocol`]`("malformed json: …")` when the line is
/// not JSON.
pub fn parse_inbound_line(line: &str) -> Result<Option<Frame>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    Ok(Some(Frame::classify(value)))
}

/// Reader task: route every inbound frame to `correlator` until the stream ends.
///
/// # Errors
///
/// Always returns `Ok(())`; stream failures are reported to pending callers
/// through [`Correlator::close`] instead.
pub async fn run_reader<R>(
    peer: String,
    input: R,
    correlator: Arc<Correlator>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(input, FrameCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer, "rpc reader: cancellation received, stopping");
                break SHUTDOWN_REASON.to_owned();
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(peer, "rpc reader: EOF detected");
                        break "stream closed".to_owned();
                    }

                    Some(Err(e)) => {
                        warn!(peer, error = %e, "rpc reader: stream error, stopping");
                        break format!("stream error: {e}");
                    }

                    Some(Ok(InboundLine::Rejected(msg))) => {
                        warn!(peer, error = msg.as_str(), "rpc reader: framing error, skipping");
                    }

                    Some(Ok(InboundLine::Text(line))) => {
                        match parse_inbound_line(&line) {
                            Ok(Some(frame)) => {
                                correlator.resolve(frame).await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(
                                    peer,
                                    error = %e,
                                    raw_line = %line,
                                    "rpc reader: parse error, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    };

    correlator.close(&reason).await;
    Ok(())
}
