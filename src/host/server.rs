//! Host serve loop.
//!
//! Requests are handled one at a time in arrival order; each response is
//! written and flushed before the next line is read.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::host::HostServer;
use crate::rpc::codec::{FrameCodec, InboundLine};
use crate::rpc::{codes, Response};
use crate::{AppError, Result};

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeExit {
    /// The peer closed its output.
    Eof,
    /// The peer sent `shutdown`.
    ShutdownRequested,
    /// `cancel` fired.
    Cancelled,
}

/// Serve `host` over one stream pair until EOF, `shutdown`, or cancellation.
///
/// # Errors
///
/// Returns [`AppError::Transport`] when writing a response fails or the
/// input stream breaks.
pub async fn serve<R, W>(
    host: Arc<HostServer>,
    input: R,
    output: W,
    cancel: CancellationToken,
) -> Result<ServeExit>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = FramedRead::new(input, FrameCodec::new());
    let mut sink = FramedWrite::new(output, FrameCodec::new());

    info!(workspace = %host.workspace_root().display(), "host serving");

    let exit = loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break ServeExit::Cancelled,
            item = lines.next() => item,
        };

        let reply = match item {
            None => break ServeExit::Eof,
            Some(Ok(InboundLine::Rejected(msg))) => {
                warn!(error = %msg, "host: unreadable line dropped");
                Some(Response::failure(
                    Value::Null,
                    codes::PARSE_ERROR,
                    "Parse error",
                    Some(Value::String(msg)),
                ))
            }
            Some(Err(e)) => {
                return Err(AppError::Transport(format!("input stream failed: {e}")));
            }
            Some(Ok(InboundLine::Text(line))) => {
                let reply = host.handle_line(&line).await;
                if let Some(response) = reply.response {
                    send(&mut sink, &response).await?;
                }
                if reply.shutdown {
                    break ServeExit::ShutdownRequested;
                }
                None
            }
        };

        if let Some(response) = reply {
            send(&mut sink, &response).await?;
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "host: closing output failed");
    }
    info!(?exit, "host stopped serving");
    Ok(exit)
}

async fn send<W>(sink: &mut FramedWrite<W, FrameCodec>, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let line = serde_json::to_string(response)?;
    sink.send(line)
        .await
        .map_err(|e| AppError::Transport(format!("write failed: {e}")))
}
