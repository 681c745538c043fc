//! Unit tests for the snapshot and git checkpoint backends.

use std::fs;
use std::path::Path;
use std::process::Command;

use reducto_bridge::workflow::checkpoint::{CheckpointStore, GitCheckpoints, SnapshotCheckpoints};
use reducto_bridge::AppError;

#[tokio::test]
async fn rollback_restores_changed_removed_and_new_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("pkg")).expect("mkdir");
    fs::write(dir.path().join("a.py"), "x = 1\n").expect("seed");
    fs::write(dir.path().join("pkg/b.py"), "y = 1\n").expect("seed");

    let store = SnapshotCheckpoints::new(dir.path());
    let token = store.checkpoint("before edit").await.expect("checkpoint");

    fs::write(dir.path().join("a.py"), "x = 99\n").expect("modify");
    fs::remove_file(dir.path().join("pkg/b.py")).expect("remove");
    fs::write(dir.path().join("c.py"), "new\n").expect("create");

    store.rollback(&token).await.expect("rollback");

    assert_eq!(fs::read_to_string(dir.path().join("a.py")).expect("read"), "x = 1\n");
    assert_eq!(fs::read_to_string(dir.path().join("pkg/b.py")).expect("read"), "y = 1\n");
    assert!(!dir.path().join("c.py").exists());
}

#[tokio::test]
async fn tokens_are_distinct_and_released_individually() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SnapshotCheckpoints::new(dir.path());

    let first = store.checkpoint("one").await.expect("checkpoint");
    let second = store.checkpoint("two").await.expect("checkpoint");
    assert_ne!(first, second);
    assert_eq!(store.len().await, 2);

    store.release(&first).await;
    assert_eq!(store.len().await, 1);
    store.release(&second).await;
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn unknown_token_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SnapshotCheckpoints::new(dir.path());

    let err = store.rollback("no-such-token").await.expect_err("unknown");
    assert!(matches!(err, AppError::Checkpoint(_)));
}

#[tokio::test]
async fn snapshot_rollback_leaves_ignored_build_output_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(".gitignore"), "target/\n").expect("seed");
    fs::write(dir.path().join("a.py"), "x = 1\n").expect("seed");

    let store = SnapshotCheckpoints::new(dir.path());
    let token = store.checkpoint("before build").await.expect("checkpoint");

    fs::create_dir_all(dir.path().join("target")).expect("mkdir");
    fs::write(dir.path().join("target/cache.bin"), "built").expect("build output");
    fs::write(dir.path().join("a.py"), "x = 2\n").expect("modify");

    store.rollback(&token).await.expect("rollback");

    assert_eq!(fs::read_to_string(dir.path().join("a.py")).expect("read"), "x = 1\n");
    assert!(dir.path().join("target/cache.bin").exists());
}

fn git_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let status = Command::new("git")
        .args(["init", "-q"])
        .current_dir(dir.path())
        .status()
        .expect("run git init");
    assert!(status.success(), "git init failed");
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn write(root: &Path, path: &str, content: &str) {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(target, content).expect("write");
}

#[tokio::test]
async fn git_rollback_restores_committed_content_exactly() {
    let dir = git_repo(&[("app.py", "x = 1\n"), ("pkg/util.py", "def f():\n    return 1\n")]);
    let store = GitCheckpoints::new(dir.path());

    let token = store.checkpoint("before refactor").await.expect("checkpoint");
    assert_eq!(token.len(), 40, "a full commit hash: {token}");

    write(dir.path(), "app.py", "x = 2\n");
    fs::remove_file(dir.path().join("pkg/util.py")).expect("remove");

    store.rollback(&token).await.expect("rollback");

    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "x = 1\n");
    assert_eq!(
        fs::read_to_string(dir.path().join("pkg/util.py")).expect("read"),
        "def f():\n    return 1\n"
    );
}

#[tokio::test]
async fn git_rollback_removes_files_created_after_the_checkpoint() {
    let dir = git_repo(&[("app.py", "x = 1\n")]);
    let store = GitCheckpoints::new(dir.path());

    let token = store.checkpoint("before create").await.expect("checkpoint");
    write(dir.path(), "pkg/new.py", "print(1)\n");

    store.rollback(&token).await.expect("rollback");

    assert!(!dir.path().join("pkg/new.py").exists());
    assert!(!dir.path().join("pkg").exists());
    assert!(dir.path().join("app.py").exists());
}

#[tokio::test]
async fn git_checkpoints_are_successive_commits() {
    let dir = git_repo(&[("app.py", "x = 1\n")]);
    let store = GitCheckpoints::new(dir.path());

    let first = store.checkpoint("one").await.expect("checkpoint");
    let second = store.checkpoint("two").await.expect("empty checkpoint");
    assert_ne!(first, second);
}

#[tokio::test]
async fn git_rollback_to_unknown_commit_fails() {
    let dir = git_repo(&[("app.py", "x = 1\n")]);
    let store = GitCheckpoints::new(dir.path());
    store.checkpoint("baseline").await.expect("checkpoint");

    let err = store
        .rollback("0123456789abcdef0123456789abcdef01234567")
        .await
        .expect_err("unknown commit");
    assert!(matches!(err, AppError::Checkpoint(_)));
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).expect("read"), "x = 1\n");
}
