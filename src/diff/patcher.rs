//! Unified diff application.
//!
//! Parses a unified diff via `diffy::Patch::from_str`, applies it to the
//! current file content, and writes the result with
//! [`crate::diff::writer::write_atomic`]. A target that does not exist yet
//! is patched as if it were empty, which is how new files are created.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use diffy::{apply as diffy_apply, create_patch, Patch};
use tracing::debug;

use crate::{AppError, Result};

use super::path_safety::resolve_workspace_path;
use super::writer::write_atomic;

/// What a successful patch did to the target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    /// Absolute path of the target.
    pub path: PathBuf,
    /// Bytes written (0 when the file was deleted).
    pub bytes_written: usize,
    /// The target did not exist before.
    pub created: bool,
    /// Every line was removed and the file was deleted.
    pub deleted: bool,
}

/// Apply `unified_diff` to `file_path` (relative to `workspace_root`).
///
/// CRLF files are normalized to LF before matching and restored
/// afterwards. A patch that removes every line deletes the file.
///
/// # Errors
///
/// - `AppError::PathViolation` if the path escapes the workspace.
/// - `AppError::Diff` if the diff cannot be parsed or the file cannot be
///   read or written.
/// - `AppError::PatchConflict` if the hunks do not match the file.
pub fn apply_unified_diff(
    workspace_root: &Path,
    file_path: &str,
    unified_diff: &str,
) -> Result<PatchSummary> {
    let target = resolve_workspace_path(workspace_root, file_path)?;

    let (current, existed) = match std::fs::read_to_string(&target) {
        Ok(content) => (content, true),
        Err(err) if err.kind() == ErrorKind::NotFound => (String::new(), false),
        Err(err) => {
            return Err(AppError::Diff(format!(
                "failed to read {file_path} for patching: {err}"
            )))
        }
    };

    let has_crlf = current.contains("\r\n");
    let current_lf = if has_crlf {
        current.replace("\r\n", "\n")
    } else {
        current
    };
    let diff_lf = unified_diff.replace("\r\n", "\n");

    let patch = Patch::from_str(&diff_lf)
        .map_err(|err| AppError::Diff(format!("failed to parse unified diff: {err}")))?;

    let patched_lf = diffy_apply(&current_lf, &patch).map_err(|err| {
        AppError::PatchConflict(format!("patch does not apply cleanly to {file_path}: {err}"))
    })?;

    let patched = if has_crlf {
        patched_lf.replace('\n', "\r\n")
    } else {
        patched_lf
    };

    if patched.is_empty() {
        if existed {
            std::fs::remove_file(&target).map_err(|err| {
                AppError::Diff(format!("failed to delete emptied file {file_path}: {err}"))
            })?;
        }
        debug!(path = file_path, "patch removed all content");
        return Ok(PatchSummary {
            path: target,
            bytes_written: 0,
            created: false,
            deleted: existed,
        });
    }

    write_atomic(&target, patched.as_bytes())?;
    debug!(path = file_path, bytes = patched.len(), created = !existed, "patch applied");

    Ok(PatchSummary {
        path: target,
        bytes_written: patched.len(),
        created: !existed,
        deleted: false,
    })
}

/// Unified diff turning `original` into `modified`, labelled with `path`.
#[must_use]
pub fn make_unified_diff(path: &str, original: &str, modified: &str) -> String {
    let body = create_patch(original, modified).to_string();
    // diffy labels the sides "original"/"modified"; relabel with the path.
    match body.split_once('\n').and_then(|(_, rest)| rest.split_once('\n')) {
        Some((_, hunks)) => format!("--- a/{path}\n+++ b/{path}\n{hunks}"),
        None => body,
    }
}
