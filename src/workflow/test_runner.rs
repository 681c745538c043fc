//! Verification step.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Result of one test run. Serialized as the `run_tests` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Whether the suite passed.
    pub success: bool,
    /// Captured stdout followed by stderr.
    #[serde(default)]
    pub output: String,
    /// Process exit code; `None` when killed or timed out.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Wall-clock duration.
    #[serde(default)]
    pub duration_ms: u64,
    /// The command that ran.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Something that can verify the workspace.
pub trait TestRunner: Send + Sync {
    /// Run the suite once.
    ///
    /// Dropping the returned future must stop the run.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TestRun`] when the suite cannot be started at all.
    /// A suite that runs and fails is `Ok` with `success: false`.
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<TestReport>> + Send + '_>>;
}

/// Runs a configured command in the workspace root.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    workspace_root: PathBuf,
    command: Vec<String>,
}

impl CommandTestRunner {
    /// Run `command` (program followed by arguments) in `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            command,
        }
    }
}

impl TestRunner for CommandTestRunner {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<TestReport>> + Send + '_>> {
        Box::pin(async move {
            let (program, args) = self
                .command
                .split_first()
                .ok_or_else(|| AppError::TestRun("test command is empty".into()))?;

            let started = Instant::now();
            let output = Command::new(program)
                .args(args)
                .current_dir(&self.workspace_root)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| AppError::TestRun(format!("failed to start {program}: {err}")))?;

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));

            Ok(TestReport {
                success: output.status.success(),
                output: text,
                exit_code: output.status.code(),
                duration_ms: elapsed_ms(started),
                command: self.command.clone(),
            })
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Run `runner` bounded by `timeout`.
///
/// Exceeding the deadline stops the run and yields a failed report.
///
/// # Errors
///
/// Propagates [`AppError::TestRun`] from the runner.
pub async fn run_bounded(runner: &dyn TestRunner, timeout: Duration) -> Result<TestReport> {
    let started = Instant::now();
    if let Ok(outcome) = tokio::time::timeout(timeout, runner.run()).await {
        let report = outcome?;
        info!(
            success = report.success,
            exit_code = ?report.exit_code,
            duration_ms = report.duration_ms,
            "test run finished"
        );
        Ok(report)
    } else {
        warn!(timeout_secs = timeout.as_secs(), "test run timed out");
        Ok(TestReport {
            success: false,
            output: format!("test run timed out after {} s", timeout.as_secs()),
            exit_code: None,
            duration_ms: elapsed_ms(started),
            command: Vec::new(),
        })
    }
}
