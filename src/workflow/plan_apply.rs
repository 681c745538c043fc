//! Whole-plan application.
//!
//! Changes are applied strictly in plan order through a [`ChangeApplier`].
//! The run stops at the first change that fails to apply or is rolled back;
//! changes committed before it stay committed.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::diff::{make_unified_diff, resolve_workspace_path};
use crate::plans::{FileChange, RefactorPlan};
use crate::rpc::client::RpcClient;
use crate::rpc::codes;
use crate::rpc::params::ApplyDiffSafeParams;
use crate::workflow::safe_apply::SafeApplier;
use crate::workflow::SafeApplyOutcome;
use crate::{AppError, Result};

/// Where plan changes are applied: over RPC, or directly on a local workspace.
pub trait ChangeApplier: Send + Sync {
    /// Current content of `path`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Any failure other than "file not found".
    fn current_content<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

    /// Run the safe-apply workflow for one diff.
    ///
    /// # Errors
    ///
    /// Transport-level failures only; workflow failures are in the outcome.
    fn apply_safe(
        &self,
        params: ApplyDiffSafeParams,
    ) -> Pin<Box<dyn Future<Output = Result<SafeApplyOutcome>> + Send + '_>>;
}

impl ChangeApplier for RpcClient {
    fn current_content<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move {
            match self.read_file(path).await {
                Ok(file) => Ok(Some(file.content)),
                Err(AppError::Rpc { code, .. }) if code == codes::FILE_NOT_FOUND => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn apply_safe(
        &self,
        params: ApplyDiffSafeParams,
    ) -> Pin<Box<dyn Future<Output = Result<SafeApplyOutcome>> + Send + '_>> {
        Box::pin(async move { self.apply_diff_safe(params).await })
    }
}

impl ChangeApplier for SafeApplier {
    fn current_content<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move { read_local(self.workspace_root(), path) })
    }

    fn apply_safe(
        &self,
        params: ApplyDiffSafeParams,
    ) -> Pin<Box<dyn Future<Output = Result<SafeApplyOutcome>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .apply(
                    &params.path,
                    &params.diff,
                    params.run_tests,
                    params.session_id.as_deref(),
                )
                .await)
        })
    }
}

fn read_local(root: &Path, path: &str) -> Result<Option<String>> {
    let target = resolve_workspace_path(root, path)?;
    match std::fs::read_to_string(target) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(format!("cannot read {path}: {err}"))),
    }
}

/// Turn one plan change into a unified diff against `current`.
///
/// # Errors
///
/// - [`AppError::NotFound`] when a modification targets a missing file.
/// - [`AppError::PatchConflict`] when `original` does not occur in the file.
pub fn change_to_diff(change: &FileChange, current: Option<&str>) -> Result<String> {
    if change.is_creation() {
        return Ok(make_unified_diff(
            &change.path,
            current.unwrap_or_default(),
            &change.modified,
        ));
    }

    let current = current.ok_or_else(|| {
        AppError::NotFound(format!("{} does not exist; cannot modify it", change.path))
    })?;

    if !current.contains(&change.original) {
        return Err(AppError::PatchConflict(format!(
            "original snippet not found in {}",
            change.path
        )));
    }

    let updated = current.replacen(&change.original, &change.modified, 1);
    Ok(make_unified_diff(&change.path, current, &updated))
}

/// Per-change entry in a [`PlanApplyReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeResult {
    /// Target path.
    pub path: String,
    /// The change's description.
    pub description: String,
    /// What happened.
    pub outcome: SafeApplyOutcome,
}

/// Aggregate result of applying a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanApplyReport {
    /// The plan's session.
    pub session_id: String,
    /// Every change was committed.
    pub success: bool,
    /// Changes committed.
    pub applied_count: usize,
    /// Changes in the plan.
    pub total_changes: usize,
    /// A change was rolled back.
    pub any_rolled_back: bool,
    /// A rollback failed.
    pub any_rollback_failed: bool,
    /// One entry per attempted change, in order.
    pub results: Vec<ChangeResult>,
    /// The failure that stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Apply `plan` change by change, stopping at the first failure.
pub async fn apply_plan(
    applier: &dyn ChangeApplier,
    plan: &RefactorPlan,
    run_tests: bool,
) -> PlanApplyReport {
    let span = info_span!("apply_plan", session_id = %plan.session_id, total = plan.changes.len());

    async move {
        let mut report = PlanApplyReport {
            session_id: plan.session_id.clone(),
            success: false,
            applied_count: 0,
            total_changes: plan.changes.len(),
            any_rolled_back: false,
            any_rollback_failed: false,
            results: Vec::with_capacity(plan.changes.len()),
            error: None,
        };

        for (index, change) in plan.changes.iter().enumerate() {
            let outcome = apply_change(applier, plan, change, run_tests).await;
            let committed = outcome.success;

            report.any_rolled_back |= outcome.rolled_back;
            report.any_rollback_failed |= outcome.rollback_failed;
            if !committed {
                report.error.clone_from(&outcome.error);
            }
            report.results.push(ChangeResult {
                path: change.path.clone(),
                description: change.description.clone(),
                outcome,
            });

            if !committed {
                warn!(
                    index,
                    path = %change.path,
                    error = report.error.as_deref().unwrap_or_default(),
                    "plan stopped at failed change"
                );
                break;
            }
            report.applied_count += 1;
        }

        report.success = report.applied_count == report.total_changes;
        info!(
            applied = report.applied_count,
            rolled_back = report.any_rolled_back,
            "plan apply finished"
        );
        report
    }
    .instrument(span)
    .await
}

async fn apply_change(
    applier: &dyn ChangeApplier,
    plan: &RefactorPlan,
    change: &FileChange,
    run_tests: bool,
) -> SafeApplyOutcome {
    let current = match applier.current_content(&change.path).await {
        Ok(current) => current,
        Err(e) => {
            return SafeApplyOutcome::aborted(&change.path, None, format!("apply failed: {e}"))
        }
    };

    let diff = match change_to_diff(change, current.as_deref()) {
        Ok(diff) => diff,
        Err(e) => {
            return SafeApplyOutcome::aborted(&change.path, None, format!("apply failed: {e}"))
        }
    };

    let params = ApplyDiffSafeParams {
        path: change.path.clone(),
        diff,
        run_tests,
        session_id: Some(plan.session_id.clone()),
    };

    match applier.apply_safe(params).await {
        Ok(outcome) => outcome,
        Err(e) => SafeApplyOutcome::aborted(&change.path, None, format!("apply failed: {e}")),
    }
}
