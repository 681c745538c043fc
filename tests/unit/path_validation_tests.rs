//! Unit tests for workspace path confinement.

use reducto_bridge::diff::resolve_workspace_path;
use reducto_bridge::AppError;

#[test]
fn relative_path_resolves_under_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical root");

    let resolved = resolve_workspace_path(dir.path(), "pkg/./mod.py").expect("resolve");
    assert_eq!(resolved, root.join("pkg").join("mod.py"));
}

#[test]
fn parent_segments_inside_root_are_folded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().canonicalize().expect("canonical root");

    let resolved = resolve_workspace_path(dir.path(), "pkg/../other.py").expect("resolve");
    assert_eq!(resolved, root.join("other.py"));
}

#[test]
fn traversal_above_root_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = resolve_workspace_path(dir.path(), "pkg/../../etc/passwd").expect_err("escape");
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[test]
fn absolute_path_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = resolve_workspace_path(dir.path(), "/etc/passwd").expect_err("absolute");
    assert!(matches!(err, AppError::PathViolation(ref msg) if msg.contains("workspace-relative")));
}

#[test]
fn missing_root_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope");
    assert!(matches!(
        resolve_workspace_path(&missing, "a.py"),
        Err(AppError::PathViolation(_))
    ));
}

#[cfg(unix)]
#[test]
fn symlink_out_of_workspace_is_rejected() {
    let outside = tempfile::tempdir().expect("outside");
    let dir = tempfile::tempdir().expect("tempdir");
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).expect("symlink");

    let err = resolve_workspace_path(dir.path(), "link/secret.txt").expect_err("symlink escape");
    assert!(matches!(err, AppError::PathViolation(ref msg) if msg.contains("outside")));
}
