//! One change, applied safely.
//!
//! ```text
//! checkpoint ──fail──▶ Aborted
//!     │
//!   apply ──────fail──▶ Aborted
//!     │
//!   test? ──no────────▶ Committed
//!     │
//!   pass ─────────────▶ Committed
//!   fail ─▶ rollback ─ok──▶ RolledBack
//!                    └fail─▶ RollbackFailed
//! ```
//!
//! Each step starts only after the previous one finished; the caller sees
//! only the terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use crate::diff::apply_unified_diff;
use crate::workflow::checkpoint::CheckpointStore;
use crate::workflow::test_runner::{run_bounded, TestReport, TestRunner};
use crate::workflow::{FinalState, SafeApplyOutcome};

/// Default bound on the test step.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs the checkpoint-apply-test-rollback sequence against a local workspace.
#[derive(Clone)]
pub struct SafeApplier {
    workspace_root: PathBuf,
    checkpoints: Arc<dyn CheckpointStore>,
    tests: Arc<dyn TestRunner>,
    test_timeout: Duration,
}

impl std::fmt::Debug for SafeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeApplier")
            .field("workspace_root", &self.workspace_root)
            .field("test_timeout", &self.test_timeout)
            .finish_non_exhaustive()
    }
}

impl SafeApplier {
    /// Build an applier for `workspace_root`.
    #[must_use]
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        checkpoints: Arc<dyn CheckpointStore>,
        tests: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            checkpoints,
            tests,
            test_timeout: DEFAULT_TEST_TIMEOUT,
        }
    }

    /// Replace the test-step bound.
    #[must_use]
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Workspace this applier writes to.
    #[must_use]
    pub fn workspace_root(&self) -> &std::path::Path {
        &self.workspace_root
    }

    /// Apply `diff` to `path` with checkpoint protection.
    ///
    /// Never fails: every failure is described by the returned outcome.
    pub async fn apply(
        &self,
        path: &str,
        diff: &str,
        run_tests: bool,
        session_id: Option<&str>,
    ) -> SafeApplyOutcome {
        let span = info_span!("apply_diff_safe", path, session_id, run_tests);
        let outcome = self.run_steps(path, diff, run_tests).instrument(span).await;

        if outcome.final_state() != FinalState::RollbackFailed {
            if let Some(token) = &outcome.checkpoint {
                self.checkpoints.release(token).await;
            }
        }
        outcome
    }

    async fn run_steps(&self, path: &str, diff: &str, run_tests: bool) -> SafeApplyOutcome {
        let message = format!("checkpoint before applying diff to {path}");
        let token = match self
            .checkpoints
            .checkpoint(&message)
            .instrument(info_span!("checkpoint"))
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "checkpoint failed, nothing applied");
                return SafeApplyOutcome::aborted(path, None, format!("checkpoint failed: {e}"));
            }
        };

        {
            let _apply = info_span!("apply", checkpoint = %token).entered();
            if let Err(e) = apply_unified_diff(&self.workspace_root, path, diff) {
                warn!(error = %e, "apply failed, workspace unchanged");
                return SafeApplyOutcome::aborted(path, Some(token), format!("apply failed: {e}"));
            }
        }

        let mut outcome = SafeApplyOutcome {
            success: true,
            path: path.to_owned(),
            checkpoint: Some(token.clone()),
            tests_run: false,
            tests_passed: false,
            rolled_back: false,
            rollback_failed: false,
            state: Some(FinalState::Committed),
            error: None,
            test_output: None,
        };

        if !run_tests {
            info!("change committed without tests");
            return outcome;
        }

        let report = run_bounded(self.tests.as_ref(), self.test_timeout)
            .instrument(info_span!("test"))
            .await;
        outcome.tests_run = true;

        let (output, failure) = match report {
            Ok(report) if report.success => {
                outcome.tests_passed = true;
                outcome.test_output = Some(report.output);
                info!("tests passed, change committed");
                return outcome;
            }
            Ok(report) => {
                let summary = failure_summary(&report);
                (report.output, summary)
            }
            Err(e) => (e.to_string(), e.to_string()),
        };

        outcome.success = false;
        outcome.test_output = Some(output);

        match self
            .checkpoints
            .rollback(&token)
            .instrument(info_span!("rollback", checkpoint = %token))
            .await
        {
            Ok(()) => {
                warn!("tests failed, change rolled back");
                outcome.rolled_back = true;
                outcome.state = Some(FinalState::RolledBack);
                outcome.error = Some(failure);
            }
            Err(e) => {
                error!(error = %e, "tests failed and rollback failed; workspace may hold the change");
                outcome.rollback_failed = true;
                outcome.state = Some(FinalState::RollbackFailed);
                outcome.error = Some(format!("rollback failed: {e}"));
            }
        }

        outcome
    }
}

/// The error recorded for a failed suite: its output, or the exit status
/// when it printed nothing.
fn failure_summary(report: &TestReport) -> String {
    if !report.output.trim().is_empty() {
        return report.output.clone();
    }
    match report.exit_code {
        Some(code) => format!("tests failed (exit code {code})"),
        None => "tests failed (no exit code)".to_owned(),
    }
}
