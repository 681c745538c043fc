//! Workspace file utilities: path confinement, unified-diff patching,
//! atomic writes and the ignore-aware workspace walk.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{AppError, Result};

pub mod patcher;
pub mod path_safety;
pub mod writer;

pub use patcher::{apply_unified_diff, make_unified_diff, PatchSummary};
pub use path_safety::resolve_workspace_path;
pub use writer::write_atomic;

/// SHA-256 of `data`, lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Every regular file under `root`, as workspace-relative paths sorted
/// lexicographically.
///
/// Hidden entries (including `.git`) and anything matched by `.gitignore`,
/// `.ignore` or the global git excludes are skipped, whether or not `root`
/// is inside a git repository. Symlinks are not followed. Entries the walker
/// cannot read are logged and skipped.
///
/// # Errors
///
/// Returns `AppError::Io` if `root` itself is not a readable directory.
pub fn walk_workspace(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(AppError::Io(format!("cannot read {}: not a directory", root.display())));
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(true)
        .require_git(false)
        .follow_links(false)
        .build();

    let mut files = Vec::new();
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), %err, "workspace walk: skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Render a workspace-relative path with `/` separators.
#[must_use]
pub fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
