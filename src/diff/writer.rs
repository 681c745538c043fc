//! Atomic file writes.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Write `content` to the already-resolved `target`.
///
/// Parent directories are created as needed. The bytes go to a temporary
/// file in the target directory which is then renamed over `target`, so a
/// reader never sees a partial file.
///
/// # Errors
///
/// Returns `AppError::Diff` on any I/O failure.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| AppError::Diff(format!("{} has no parent directory", target.display())))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Diff(format!(
            "failed to create parent directories for {}: {err}",
            target.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Diff(format!("failed to create temporary file: {err}")))?;

    tmp.write_all(content)
        .map_err(|err| AppError::Diff(format!("failed to write temporary file: {err}")))?;

    tmp.persist(target).map_err(|err| {
        AppError::Diff(format!(
            "failed to persist file to {}: {err}",
            target.display()
        ))
    })?;

    Ok(())
}
