//! Path confinement.
//!
//! Every file the host touches on behalf of the sidecar goes through
//! [`resolve_workspace_path`] first.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Resolve a workspace-relative `candidate` to an absolute path under
/// `workspace_root`.
///
/// `..` segments are folded lexically and may not climb above the root.
/// When the target (or its nearest existing ancestor) exists it is
/// canonicalized, so a symlink pointing outside the workspace is rejected.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - the workspace root cannot be canonicalized;
/// - `candidate` is absolute or empty;
/// - `..` traversal escapes the root;
/// - a symlink on the path resolves outside the root.
pub fn resolve_workspace_path(workspace_root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let candidate = candidate.as_ref();
    let root = workspace_root
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("workspace root invalid: {err}")))?;

    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(format!(
                        "{} escapes the workspace",
                        candidate.display()
                    )));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathViolation(format!(
                    "{} is absolute; paths must be workspace-relative",
                    candidate.display()
                )));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(AppError::PathViolation("path is empty".into()));
    }

    let absolute = root.join(&normalized);

    // Canonicalize the deepest part of the path that exists on disk and
    // re-attach the rest.
    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    while !existing.exists() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        tail.push(name.to_os_string());
        existing = parent;
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;
    if !resolved.starts_with(&root) {
        return Err(AppError::PathViolation(format!(
            "{} resolves outside the workspace",
            candidate.display()
        )));
    }
    for name in tail.iter().rev() {
        resolved.push(name);
    }

    Ok(resolved)
}
