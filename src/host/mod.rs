//! Host side of the bridge: serves the method table to the sidecar.
//!
//! The host owns the workspace. Every request is parsed into a
//! [`MethodParams`], validated, and dispatched to a handler in
//! [`handlers`]. Failures are answered with a JSON-RPC error frame whose
//! code comes from [`AppError::rpc_code`].

pub mod handlers;
pub mod server;
pub mod spawner;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::{BridgeConfig, CheckpointBackend};
use crate::rpc::params::MethodParams;
use crate::rpc::{codes, Response, JSONRPC_VERSION};
use crate::workflow::checkpoint::{CheckpointStore, GitCheckpoints, SnapshotCheckpoints};
use crate::workflow::safe_apply::{SafeApplier, DEFAULT_TEST_TIMEOUT};
use crate::workflow::test_runner::{CommandTestRunner, TestRunner};
use crate::{AppError, Result};

/// What the serve loop should do after one inbound line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Frame to write back; `None` for blank lines and notifications.
    pub response: Option<Response>,
    /// The peer asked the host to stop.
    pub shutdown: bool,
}

impl Reply {
    fn respond(response: Response) -> Self {
        Self {
            response: Some(response),
            shutdown: false,
        }
    }

    fn silent() -> Self {
        Self {
            response: None,
            shutdown: false,
        }
    }
}

/// Method dispatcher bound to one workspace.
pub struct HostServer {
    workspace_root: PathBuf,
    checkpoints: Arc<dyn CheckpointStore>,
    tests: Arc<dyn TestRunner>,
    applier: SafeApplier,
    test_timeout: Duration,
    last_checkpoint: Mutex<Option<String>>,
}

impl std::fmt::Debug for HostServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServer")
            .field("workspace_root", &self.workspace_root)
            .field("test_timeout", &self.test_timeout)
            .finish_non_exhaustive()
    }
}

impl HostServer {
    /// Serve `workspace_root` with the given backends.
    #[must_use]
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        checkpoints: Arc<dyn CheckpointStore>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        let workspace_root = workspace_root.into();
        let applier = SafeApplier::new(
            workspace_root.clone(),
            Arc::clone(&checkpoints),
            Arc::clone(&tests),
        );
        Self {
            workspace_root,
            checkpoints,
            tests,
            applier,
            test_timeout: DEFAULT_TEST_TIMEOUT,
            last_checkpoint: Mutex::new(None),
        }
    }

    /// Build the server described by `config`.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        let root = config.workspace_root.clone();
        let checkpoints: Arc<dyn CheckpointStore> = match config.checkpoint_backend {
            CheckpointBackend::Git => Arc::new(GitCheckpoints::new(root.clone())),
            CheckpointBackend::Snapshot => Arc::new(SnapshotCheckpoints::new(root.clone())),
        };
        let tests: Arc<dyn TestRunner> =
            Arc::new(CommandTestRunner::new(root.clone(), config.test_command.clone()));

        Self::new(root, checkpoints, tests).with_test_timeout(config.test_timeout())
    }

    /// Replace the bound on test runs.
    #[must_use]
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self.applier = self.applier.with_test_timeout(timeout);
        self
    }

    /// Workspace served by this host.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Handle one inbound line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        if line.trim().is_empty() {
            return Reply::silent();
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "host: unparsable request line");
                return Reply::respond(Response::failure(
                    Value::Null,
                    codes::PARSE_ERROR,
                    "Parse error",
                    Some(Value::String(e.to_string())),
                ));
            }
        };

        let envelope = match RequestEnvelope::from_value(value) {
            Ok(envelope) => envelope,
            Err((id, e)) => {
                warn!(error = %e, "host: invalid request");
                return Reply::respond(Response::failure(
                    id,
                    codes::INVALID_REQUEST,
                    "Invalid Request",
                    Some(Value::String(e.to_string())),
                ));
            }
        };

        let RequestEnvelope { id, method, params } = envelope;
        let span = info_span!("host_request", method = %method, id = ?id);
        let outcome = async {
            let params = MethodParams::parse(&method, params)?;
            params.validate()?;
            self.dispatch(params).await
        }
        .instrument(span)
        .await;

        let Some(id) = id else {
            debug!(method = %method, "host: notification handled, no reply");
            return Reply::silent();
        };

        let shutdown = method == "shutdown" && outcome.is_ok();
        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(e) => {
                debug!(method = %method, error = %e, "host: request failed");
                Response::failure(id, e.rpc_code(), e.to_string(), None)
            }
        };

        Reply {
            response: Some(response),
            shutdown,
        }
    }

    /// Run the handler for one validated request.
    ///
    /// # Errors
    ///
    /// Whatever the handler reports; see [`handlers`].
    pub async fn dispatch(&self, params: MethodParams) -> Result<Value> {
        match params {
            MethodParams::Initialize(p) => Ok(handlers::initialize(self, &p)),
            MethodParams::Shutdown => Ok(handlers::shutdown()),
            MethodParams::ListFiles(p) => handlers::list_files(self, &p),
            MethodParams::ReadFile(p) => handlers::read_file(self, &p),
            MethodParams::ApplyDiff(p) => handlers::apply_diff(self, &p),
            MethodParams::ApplyDiffSafe(p) => handlers::apply_diff_safe(self, &p).await,
            MethodParams::RunTests => handlers::run_tests(self).await,
            MethodParams::GitCheckpoint(p) => handlers::git_checkpoint(self, &p).await,
            MethodParams::GitRollback => handlers::git_rollback(self).await,
            unsupported @ (MethodParams::GetSymbols(_)
            | MethodParams::GetComplexity(_)
            | MethodParams::FindReferences(_)) => {
                Err(AppError::MethodNotFound(unsupported.method().to_owned()))
            }
        }
    }
}

/// The parts of a request frame the host needs before typed parsing.
struct RequestEnvelope {
    id: Option<Value>,
    method: String,
    params: Value,
}

impl RequestEnvelope {
    fn from_value(value: Value) -> std::result::Result<Self, (Value, AppError)> {
        let Value::Object(mut obj) = value else {
            return Err((Value::Null, AppError::Protocol("request is not a JSON object".into())));
        };

        let id = obj.remove("id").filter(|id| !id.is_null());
        let reply_id = id.clone().unwrap_or(Value::Null);

        if let Some(id) = &id {
            if !(id.is_number() || id.is_string()) {
                return Err((Value::Null, AppError::Protocol("id must be a number or string".into())));
            }
        }

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err((reply_id, AppError::Protocol("jsonrpc must be \"2.0\"".into())));
        }

        let Some(Value::String(method)) = obj.remove("method") else {
            return Err((reply_id, AppError::Protocol("method must be a string".into())));
        };

        Ok(Self {
            id,
            method,
            params: obj.remove("params").unwrap_or(Value::Null),
        })
    }
}
