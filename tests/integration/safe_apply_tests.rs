//! The checkpoint-apply-test-rollback sequence against a local workspace.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use reducto_bridge::diff::make_unified_diff;
use reducto_bridge::workflow::checkpoint::SnapshotCheckpoints;
use reducto_bridge::workflow::safe_apply::SafeApplier;
use reducto_bridge::workflow::FinalState;

use super::test_helpers::{BrokenRollback, FailingCheckpoints, MarkerRunner, SlowRunner};

fn seeded() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("app.py"), "x = 1\n").expect("seed");
    dir
}

fn read(dir: &tempfile::TempDir, path: &str) -> String {
    fs::read_to_string(dir.path().join(path)).expect("read")
}

#[tokio::test]
async fn passing_tests_commit_and_release_the_checkpoint() {
    let dir = seeded();
    let store = Arc::new(SnapshotCheckpoints::new(dir.path()));
    let applier = SafeApplier::new(dir.path(), store.clone(), Arc::new(MarkerRunner::new(dir.path())));

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "x = 2\n"), true, None)
        .await;

    assert!(outcome.success);
    assert!(outcome.tests_run);
    assert!(outcome.tests_passed);
    assert!(!outcome.rolled_back);
    assert_eq!(outcome.final_state(), FinalState::Committed);
    assert_eq!(outcome.test_output.as_deref(), Some("1 passed"));
    assert_eq!(read(&dir, "app.py"), "x = 2\n");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn failing_tests_restore_the_checkpoint() {
    let dir = seeded();
    let store = Arc::new(SnapshotCheckpoints::new(dir.path()));
    let applier = SafeApplier::new(dir.path(), store.clone(), Arc::new(MarkerRunner::new(dir.path())));

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "BROKEN\n"), true, Some("s-9"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.rolled_back);
    assert!(!outcome.rollback_failed);
    assert_eq!(outcome.final_state(), FinalState::RolledBack);
    assert_eq!(outcome.error.as_deref(), Some("FAILED: app.py"));
    assert_eq!(read(&dir, "app.py"), "x = 1\n");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn rolled_back_creation_removes_the_new_file() {
    let dir = seeded();
    let applier = SafeApplier::new(
        dir.path(),
        Arc::new(SnapshotCheckpoints::new(dir.path())),
        Arc::new(MarkerRunner::new(dir.path())),
    );

    let outcome = applier
        .apply("pkg/new.py", &make_unified_diff("pkg/new.py", "", "BROKEN\n"), true, None)
        .await;

    assert_eq!(outcome.final_state(), FinalState::RolledBack);
    assert!(!dir.path().join("pkg/new.py").exists());
}

#[tokio::test]
async fn checkpoint_failure_aborts_before_touching_files() {
    let dir = seeded();
    let applier = SafeApplier::new(
        dir.path(),
        Arc::new(FailingCheckpoints),
        Arc::new(MarkerRunner::new(dir.path())),
    );

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "x = 2\n"), true, None)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.final_state(), FinalState::Aborted);
    assert_eq!(outcome.checkpoint, None);
    assert!(!outcome.tests_run);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("checkpoint failed")));
    assert_eq!(read(&dir, "app.py"), "x = 1\n");
}

#[tokio::test]
async fn apply_failure_aborts_and_keeps_the_file() {
    let dir = seeded();
    let store = Arc::new(SnapshotCheckpoints::new(dir.path()));
    let applier = SafeApplier::new(dir.path(), store.clone(), Arc::new(MarkerRunner::new(dir.path())));

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "z = 0\n", "z = 1\n"), true, None)
        .await;

    assert_eq!(outcome.final_state(), FinalState::Aborted);
    assert!(outcome.checkpoint.is_some());
    assert!(!outcome.tests_run);
    assert!(!outcome.rolled_back);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("apply failed")));
    assert_eq!(read(&dir, "app.py"), "x = 1\n");
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn failed_rollback_is_reported_distinctly() {
    let dir = seeded();
    let applier = SafeApplier::new(
        dir.path(),
        Arc::new(BrokenRollback),
        Arc::new(MarkerRunner::new(dir.path())),
    );

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "BROKEN\n"), true, None)
        .await;

    assert!(!outcome.success);
    assert!(outcome.rollback_failed);
    assert!(!outcome.rolled_back);
    assert_eq!(outcome.final_state(), FinalState::RollbackFailed);
    assert!(outcome
        .error
        .as_deref()
        .is_some_and(|e| e.starts_with("rollback failed")));
    // The broken change is still on disk.
    assert_eq!(read(&dir, "app.py"), "BROKEN\n");
}

#[tokio::test]
async fn overrunning_tests_count_as_failure() {
    let dir = seeded();
    let applier = SafeApplier::new(
        dir.path(),
        Arc::new(SnapshotCheckpoints::new(dir.path())),
        Arc::new(SlowRunner),
    )
    .with_test_timeout(Duration::from_millis(100));

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "x = 2\n"), true, None)
        .await;

    assert_eq!(outcome.final_state(), FinalState::RolledBack);
    assert!(outcome
        .test_output
        .as_deref()
        .is_some_and(|o| o.contains("timed out")));
    assert_eq!(read(&dir, "app.py"), "x = 1\n");
}

#[cfg(unix)]
#[tokio::test]
async fn silent_failing_suite_reports_its_exit_code() {
    use reducto_bridge::workflow::test_runner::CommandTestRunner;

    let dir = seeded();
    let applier = SafeApplier::new(
        dir.path(),
        Arc::new(SnapshotCheckpoints::new(dir.path())),
        Arc::new(CommandTestRunner::new(
            dir.path(),
            vec!["sh".into(), "-c".into(), "exit 4".into()],
        )),
    );

    let outcome = applier
        .apply("app.py", &make_unified_diff("app.py", "x = 1\n", "x = 2\n"), true, None)
        .await;

    assert_eq!(outcome.final_state(), FinalState::RolledBack);
    assert_eq!(outcome.error.as_deref(), Some("tests failed (exit code 4)"));
    assert_eq!(outcome.test_output.as_deref(), Some(""));
    assert_eq!(read(&dir, "app.py"), "x = 1\n");
}
