//! Checkpoint-apply-test-rollback workflow.
//!
//! - `checkpoint`: restorable workspace snapshots (git or in-memory).
//! - `test_runner`: the verification step.
//! - `safe_apply`: one change, run as a strict state machine.
//! - `plan_apply`: a whole plan, change by change, stopping at the first failure.

pub mod checkpoint;
pub mod plan_apply;
pub mod safe_apply;
pub mod test_runner;

use serde::{Deserialize, Serialize};

/// Terminal state of one safe-apply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    /// The change is kept.
    Committed,
    /// Tests failed and the workspace was restored to the checkpoint.
    RolledBack,
    /// Checkpoint or apply failed; nothing was changed.
    Aborted,
    /// Tests failed and restoring the checkpoint failed too. The workspace
    /// may hold the broken change.
    RollbackFailed,
}

/// Result of `apply_diff_safe`, shared by the host and the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeApplyOutcome {
    /// `true` only when the change was committed.
    pub success: bool,
    /// Target path.
    #[serde(default)]
    pub path: String,
    /// Checkpoint token taken before applying.
    #[serde(default)]
    pub checkpoint: Option<String>,
    /// Whether the test suite ran.
    #[serde(default)]
    pub tests_run: bool,
    /// Whether the test suite passed. `false` when tests did not run.
    #[serde(default)]
    pub tests_passed: bool,
    /// Whether the workspace was restored to the checkpoint.
    #[serde(default)]
    pub rolled_back: bool,
    /// Tests failed and the restore failed as well.
    #[serde(default)]
    pub rollback_failed: bool,
    /// Terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FinalState>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured test output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
}

impl SafeApplyOutcome {
    /// Outcome for a run that stopped before touching the workspace.
    #[must_use]
    pub fn aborted(path: &str, checkpoint: Option<String>, error: String) -> Self {
        Self {
            success: false,
            path: path.to_owned(),
            checkpoint,
            tests_run: false,
            tests_passed: false,
            rolled_back: false,
            rollback_failed: false,
            state: Some(FinalState::Aborted),
            error: Some(error),
            test_output: None,
        }
    }

    /// Terminal state, inferred from the flags when the peer omitted it.
    #[must_use]
    pub fn final_state(&self) -> FinalState {
        if let Some(state) = self.state {
            return state;
        }
        if self.rollback_failed {
            FinalState::RollbackFailed
        } else if self.rolled_back {
            FinalState::RolledBack
        } else if self.success {
            FinalState::Committed
        } else {
            FinalState::Aborted
        }
    }
}
