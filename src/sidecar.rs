//! Sidecar-side context.
//!
//! [`Sidecar`] owns everything the analysis side needs for one host
//! connection: the RPC client and the session plan store. It is built
//! explicitly and torn down with [`Sidecar::shutdown`]; nothing lives in
//! globals.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, info_span, warn, Instrument};

use crate::config::BridgeConfig;
use crate::plans::store::DEFAULT_PLAN_TTL;
use crate::plans::{FileChange, PlanStore, RefactorPlan};
use crate::rpc::client::{CallTimeouts, RpcClient};
use crate::rpc::params::InitializeResult;
use crate::workflow::plan_apply::{apply_plan, PlanApplyReport};
use crate::{AppError, Result};

/// Tunables for a [`Sidecar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidecarOptions {
    /// Per-call deadlines.
    pub timeouts: CallTimeouts,
    /// Lifetime of a stored plan.
    pub plan_ttl: Duration,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            timeouts: CallTimeouts::default(),
            plan_ttl: DEFAULT_PLAN_TTL,
        }
    }
}

impl From<&BridgeConfig> for SidecarOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            timeouts: CallTimeouts {
                default: config.call_timeout(),
                symbols: config.symbol_timeout(),
            },
            plan_ttl: config.plan_ttl(),
        }
    }
}

/// One connection to the host plus the plans proposed over it.
#[derive(Debug)]
pub struct Sidecar {
    client: RpcClient,
    plans: PlanStore,
}

impl Sidecar {
    /// Connect over an arbitrary stream pair.
    pub fn connect<R, W>(reader: R, writer: W, options: SidecarOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            client: RpcClient::connect("host", reader, writer).with_timeouts(options.timeouts),
            plans: PlanStore::new(options.plan_ttl),
        }
    }

    /// Connect over this process's stdin/stdout, as launched by the host.
    #[must_use]
    pub fn stdio(options: SidecarOptions) -> Self {
        Self {
            client: RpcClient::stdio().with_timeouts(options.timeouts),
            plans: PlanStore::new(options.plan_ttl),
        }
    }

    /// The RPC client for direct calls.
    #[must_use]
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// The session plan store.
    #[must_use]
    pub fn plans(&self) -> &PlanStore {
        &self.plans
    }

    /// Tell the host which repository to work on.
    ///
    /// # Errors
    ///
    /// As [`RpcClient::initialize`].
    pub async fn initialize(&self, root_dir: &str) -> Result<InitializeResult> {
        let result = self.client.initialize(root_dir).await?;
        info!(status = %result.status, tools = result.tools.len(), "host initialized");
        Ok(result)
    }

    /// Record a new plan under a fresh session id.
    ///
    /// # Errors
    ///
    /// [`AppError::InvalidParams`] for an empty plan or a change without a
    /// path.
    pub fn propose(
        &self,
        changes: Vec<FileChange>,
        description: impl Into<String>,
        pattern: Option<String>,
    ) -> Result<Arc<RefactorPlan>> {
        if changes.is_empty() {
            return Err(AppError::InvalidParams("plan has no changes".into()));
        }
        if let Some(bad) = changes.iter().position(|c| c.path.trim().is_empty()) {
            return Err(AppError::InvalidParams(format!("change {bad} has an empty path")));
        }

        self.plans.evict_expired();
        let plan = self.plans.store(RefactorPlan::new(changes, description, pattern))?;
        info!(session_id = %plan.session_id, changes = plan.changes.len(), "plan proposed");
        Ok(plan)
    }

    /// Apply the plan stored under `session_id`, change by change.
    ///
    /// A fully successful plan is dropped from the store; a partial one
    /// stays so the caller can inspect or retry it.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for an unknown or expired session. Failures of
    /// individual changes are reported in the returned report.
    pub async fn apply_plan(&self, session_id: &str, run_tests: bool) -> Result<PlanApplyReport> {
        self.plans.evict_expired();
        let plan = self.plans.require(session_id)?;

        let report = apply_plan(&self.client, &plan, run_tests)
            .instrument(info_span!("sidecar_apply_plan", session_id))
            .await;

        if report.success {
            self.plans.remove(session_id);
        } else {
            warn!(
                session_id,
                applied = report.applied_count,
                total = report.total_changes,
                "plan only partially applied; kept in store"
            );
        }
        Ok(report)
    }

    /// Close the connection: stop background tasks and fail pending calls.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

/// Error half of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    /// Coarse classification, see [`crate::errors::ErrorKind`].
    pub kind: &'static str,
    /// JSON-RPC code the error maps to.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Retrying the operation could succeed.
    pub retryable: bool,
}

/// Uniform success/error wrapper for top-level results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    /// `"ok"` or `"error"`.
    pub status: &'static str,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Description on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl<T> Envelope<T> {
    /// Wrap an operation result.
    #[must_use]
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                status: "ok",
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                status: "error",
                data: None,
                error: Some(EnvelopeError {
                    kind: e.kind().as_str(),
                    code: e.rpc_code(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                }),
            },
        }
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
