//! Typed JSON-RPC client.
//!
//! [`RpcClient::connect`] takes ownership of a stream pair and spawns the
//! reader and writer tasks. Every call allocates a fresh id, registers a
//! completion slot with the [`Correlator`], hands the serialized frame to the
//! writer task and then waits on its own slot. Calls are never serialized
//! against each other.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::correlator::{Correlator, PendingCall};
use crate::rpc::params::{
    ApplyDiffParams, ApplyDiffResult, ApplyDiffSafeParams, CheckpointParams, CheckpointResult,
    ComplexityResult, InitializeParams, InitializeResult, ListFilesParams, ListFilesResult,
    MethodParams, PathParams, ReadFileResult, ReferencesParams, ReferencesResult,
    RollbackResult, SourceParams, SymbolsResult,
};
use crate::rpc::reader::{run_reader, SHUTDOWN_REASON};
use crate::rpc::writer::run_writer;
use crate::rpc::Request;
use crate::workflow::test_runner::TestReport;
use crate::workflow::SafeApplyOutcome;
use crate::{AppError, Result};

/// Capacity of the outbound frame channel.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Default bound on `get_symbols` calls.
pub const DEFAULT_SYMBOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call deadlines applied by the typed wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Deadline for every call; `None` waits indefinitely.
    pub default: Option<Duration>,
    /// Deadline for `get_symbols`.
    pub symbols: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            default: None,
            symbols: DEFAULT_SYMBOL_TIMEOUT,
        }
    }
}

struct Tasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Client half of one JSON-RPC connection.
pub struct RpcClient {
    peer: String,
    correlator: Arc<Correlator>,
    frame_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    timeouts: CallTimeouts,
    tasks: Mutex<Option<Tasks>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("peer", &self.peer)
            .field("timeouts", &self.timeouts)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Take ownership of `reader`/`writer` and start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(peer: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let peer = peer.into();
        let correlator = Arc::new(Correlator::new());
        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) = mpsc::channel::<String>(FRAME_CHANNEL_CAPACITY);

        let reader_task = {
            let peer = peer.clone();
            let correlator = Arc::clone(&correlator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = run_reader(peer.clone(), reader, correlator, cancel).await {
                    warn!(peer, error = %e, "rpc client: reader task failed");
                }
            })
        };

        // A failed write leaves the connection unusable: fail everything in
        // flight and stop the reader too.
        let writer_task = {
            let peer = peer.clone();
            let correlator = Arc::clone(&correlator);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = run_writer(peer.clone(), writer, frame_rx, cancel.clone()).await {
                    warn!(peer, error = %e, "rpc client: writer task failed, closing connection");
                    correlator.close(&e.to_string()).await;
                    cancel.cancel();
                }
            })
        };

        info!(peer, "rpc client connected");

        Self {
            peer,
            correlator,
            frame_tx,
            cancel,
            timeouts: CallTimeouts::default(),
            tasks: Mutex::new(Some(Tasks {
                reader: reader_task,
                writer: writer_task,
            })),
        }
    }

    /// Connect over this process's own stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::connect("stdio", tokio::io::stdin(), tokio::io::stdout())
    }

    /// Replace the per-call deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Deadlines currently in effect.
    #[must_use]
    pub fn timeouts(&self) -> CallTimeouts {
        self.timeouts
    }

    /// Whether the connection can still carry calls.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Number of calls awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.correlator.pending_count().await
    }

    /// Issue one raw call and wait for its response.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotConnected`] after [`Self::shutdown`] or a writer failure.
    /// - [`AppError::Rpc`] when the peer answers with an error frame.
    /// - [`AppError::Closed`] when the connection ends before the response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let pending = self.send_request(method, params).await?;
        pending.wait().await
    }

    /// Issue one raw call bounded by `timeout`.
    ///
    /// On expiry the pending slot is removed, so a late response is logged
    /// as an unknown id and dropped.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus [`AppError::Timeout`] on expiry.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let pending = self.send_request(method, params).await?;
        let id = pending.id();

        if let Ok(outcome) = tokio::time::timeout(timeout, pending.wait()).await {
            outcome
        } else {
            self.correlator.cancel(id).await;
            warn!(peer = %self.peer, id, method, ?timeout, "rpc call timed out");
            Err(AppError::Timeout(format!(
                "{method} (id {id}) exceeded {} ms",
                timeout.as_millis()
            )))
        }
    }

    /// Validate `params` locally, then send it under the default deadline.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidParams`] before anything is written; otherwise as
    /// [`Self::call_with_timeout`].
    pub async fn request(&self, params: &MethodParams) -> Result<Value> {
        self.request_with(params, self.timeouts.default).await
    }

    async fn request_with(
        &self,
        params: &MethodParams,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        params.validate()?;
        let value = params.to_value()?;
        match timeout {
            Some(timeout) => {
                self.call_with_timeout(params.method(), value, timeout)
                    .await
            }
            None => self.call(params.method(), value).await,
        }
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        params: &MethodParams,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let value = self.request_with(params, timeout).await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::Protocol(format!("unexpected {} result shape: {e}", params.method()))
        })
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<PendingCall> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }

        let id = self.correlator.next_id();
        let line = serde_json::to_string(&Request::new(id, method, params))?;

        let pending = self.correlator.register(id).await.map_err(|e| match e {
            AppError::Closed(_) => AppError::NotConnected,
            other => other,
        })?;

        if self.frame_tx.send(line).await.is_err() {
            self.correlator.cancel(id).await;
            return Err(AppError::NotConnected);
        }

        debug!(peer = %self.peer, id, method, "rpc request sent");
        Ok(pending)
    }

    /// `initialize`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn initialize(&self, root_dir: &str) -> Result<InitializeResult> {
        let params = MethodParams::Initialize(InitializeParams {
            root_dir: root_dir.to_owned(),
        });
        self.typed(&params, self.timeouts.default).await
    }

    /// `list_files`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn list_files(&self, params: ListFilesParams) -> Result<ListFilesResult> {
        self.typed(&MethodParams::ListFiles(params), self.timeouts.default)
            .await
    }

    /// `read_file`
    ///
    /// # Errors
    ///
    /// As [`Self::request`]; a missing file comes back as [`AppError::Rpc`]
    /// with code `-32001`.
    pub async fn read_file(&self, path: &str) -> Result<ReadFileResult> {
        let params = MethodParams::ReadFile(PathParams {
            path: path.to_owned(),
        });
        self.typed(&params, self.timeouts.default).await
    }

    /// `get_symbols`, bounded by the symbol deadline.
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn get_symbols(&self, path: &str, content: Option<String>) -> Result<SymbolsResult> {
        let params = MethodParams::GetSymbols(SourceParams {
            path: path.to_owned(),
            content,
        });
        self.typed(&params, Some(self.timeouts.symbols)).await
    }

    /// `get_complexity`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn get_complexity(
        &self,
        path: &str,
        content: Option<String>,
    ) -> Result<ComplexityResult> {
        let params = MethodParams::GetComplexity(SourceParams {
            path: path.to_owned(),
            content,
        });
        self.typed(&params, self.timeouts.default).await
    }

    /// `find_references`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn find_references(
        &self,
        path: &str,
        line: u32,
        column: u32,
    ) -> Result<ReferencesResult> {
        let params = MethodParams::FindReferences(ReferencesParams {
            path: path.to_owned(),
            line,
            column,
        });
        self.typed(&params, self.timeouts.default).await
    }

    /// `apply_diff`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn apply_diff(&self, params: ApplyDiffParams) -> Result<ApplyDiffResult> {
        self.typed(&MethodParams::ApplyDiff(params), self.timeouts.default)
            .await
    }

    /// `apply_diff_safe`
    ///
    /// Workflow failures (checkpoint, apply, tests, rollback) are reported in
    /// the returned outcome, not as `Err`.
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn apply_diff_safe(&self, params: ApplyDiffSafeParams) -> Result<SafeApplyOutcome> {
        self.typed(&MethodParams::ApplyDiffSafe(params), self.timeouts.default)
            .await
    }

    /// `run_tests`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn run_tests(&self) -> Result<TestReport> {
        self.typed(&MethodParams::RunTests, self.timeouts.default)
            .await
    }

    /// `git_checkpoint`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn git_checkpoint(&self, message: &str) -> Result<CheckpointResult> {
        let params = MethodParams::GitCheckpoint(CheckpointParams::new(message));
        self.typed(&params, self.timeouts.default).await
    }

    /// `git_rollback`
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn git_rollback(&self) -> Result<RollbackResult> {
        self.typed(&MethodParams::GitRollback, self.timeouts.default)
            .await
    }

    /// Stop both tasks and fail every pending call with [`AppError::Closed`].
    ///
    /// Idempotent. Later calls fail with [`AppError::NotConnected`].
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.correlator.close(SHUTDOWN_REASON).await;

        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };

        for (name, handle) in [("reader", tasks.reader), ("writer", tasks.writer)] {
            if let Err(e) = handle.await {
                warn!(peer = %self.peer, task = name, error = %e, "rpc client: task join failed");
            }
        }

        info!(peer = %self.peer, "rpc client shut down");
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
