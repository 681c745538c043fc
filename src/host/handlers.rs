//! Handlers for the methods the host serves.

use std::io::ErrorKind;

use glob::Pattern;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::diff::{
    apply_unified_diff, display_relative, resolve_workspace_path, sha256_hex, walk_workspace,
};
use crate::host::HostServer;
use crate::rpc::params::{
    ApplyDiffParams, ApplyDiffSafeParams, CheckpointParams, CheckpointResult, FileEntry,
    InitializeParams, ListFilesParams, ListFilesResult, PathParams, ReadFileResult,
    RollbackResult,
};
use crate::workflow::test_runner::run_bounded;
use crate::{AppError, Result};

/// Methods with a working handler, as advertised by `initialize`.
pub const SERVED_METHODS: &[&str] = &[
    "initialize",
    "shutdown",
    "list_files",
    "read_file",
    "apply_diff",
    "apply_diff_safe",
    "run_tests",
    "git_checkpoint",
    "git_rollback",
];

fn to_value<T: serde::Serialize>(result: &T) -> Result<Value> {
    serde_json::to_value(result).map_err(|e| AppError::Internal(format!("result serialization: {e}")))
}

/// `initialize`: report readiness and the served methods.
pub(crate) fn initialize(host: &HostServer, params: &InitializeParams) -> Value {
    let requested = std::path::Path::new(&params.root_dir);
    if requested.canonicalize().ok().as_deref() != Some(host.workspace_root()) {
        warn!(
            requested = %params.root_dir,
            serving = %host.workspace_root().display(),
            "initialize: sidecar root differs from the served workspace"
        );
    }

    json!({
        "status": "initialized",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": SERVED_METHODS,
    })
}

/// `shutdown`: acknowledge; the serve loop stops after replying.
pub(crate) fn shutdown() -> Value {
    json!({ "status": "shutdown" })
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| AppError::InvalidParams(format!("invalid glob pattern {p:?}: {e}")))
        })
        .collect()
}

/// `list_files`: every workspace file passing the include/exclude globs.
///
/// A path is excluded when an exclude pattern matches the whole path or
/// any single component of it (so `node_modules` drops the whole tree).
pub(crate) fn list_files(host: &HostServer, params: &ListFilesParams) -> Result<Value> {
    let include = compile(&params.include_patterns)?;
    let exclude = compile(&params.exclude_patterns)?;
    let root = host.workspace_root();

    let mut files = Vec::new();
    for rel in walk_workspace(root)? {
        let shown = display_relative(&rel);

        let excluded = exclude.iter().any(|p| {
            p.matches(&shown)
                || rel
                    .components()
                    .any(|c| p.matches(&c.as_os_str().to_string_lossy()))
        });
        if excluded {
            continue;
        }
        if !include.is_empty() && !include.iter().any(|p| p.matches(&shown)) {
            continue;
        }

        let content = std::fs::read(root.join(&rel))?;
        files.push(FileEntry {
            path: shown,
            hash: Some(sha256_hex(&content)),
            size: u64::try_from(content.len()).ok(),
        });
    }

    let total = files.len();
    to_value(&ListFilesResult { files, total })
}

/// `read_file`: content and SHA-256 of one file.
pub(crate) fn read_file(host: &HostServer, params: &PathParams) -> Result<Value> {
    let target = resolve_workspace_path(host.workspace_root(), &params.path)?;
    let content = std::fs::read_to_string(&target).map_err(|err| match err.kind() {
        ErrorKind::NotFound => AppError::NotFound(format!("file {} does not exist", params.path)),
        _ => AppError::Io(format!("cannot read {}: {err}", params.path)),
    })?;

    let hash = sha256_hex(content.as_bytes());
    to_value(&ReadFileResult { content, hash })
}

/// `apply_diff`: patch one file without checkpoint protection.
pub(crate) fn apply_diff(host: &HostServer, params: &ApplyDiffParams) -> Result<Value> {
    let summary = apply_unified_diff(host.workspace_root(), &params.path, &params.diff)?;
    info!(
        path = %params.path,
        session_id = params.session_id.as_deref(),
        bytes = summary.bytes_written,
        created = summary.created,
        deleted = summary.deleted,
        "diff applied"
    );
    Ok(json!({ "success": true, "path": params.path }))
}

/// `apply_diff_safe`: checkpoint, apply, test, roll back on failure.
pub(crate) async fn apply_diff_safe(host: &HostServer, params: &ApplyDiffSafeParams) -> Result<Value> {
    let outcome = host
        .applier
        .apply(
            &params.path,
            &params.diff,
            params.run_tests,
            params.session_id.as_deref(),
        )
        .await;
    to_value(&outcome)
}

/// `run_tests`: run the suite once under the configured bound.
pub(crate) async fn run_tests(host: &HostServer) -> Result<Value> {
    let report = run_bounded(host.tests.as_ref(), host.test_timeout).await?;
    to_value(&report)
}

/// `git_checkpoint`: record the workspace and remember the token.
pub(crate) async fn git_checkpoint(host: &HostServer, params: &CheckpointParams) -> Result<Value> {
    let token = host.checkpoints.checkpoint(&params.message).await?;
    *host.last_checkpoint.lock().await = Some(token.clone());
    to_value(&CheckpointResult {
        success: true,
        commit_hash: token,
    })
}

/// `git_rollback`: restore the last checkpoint taken through this host.
pub(crate) async fn git_rollback(host: &HostServer) -> Result<Value> {
    let token = host
        .last_checkpoint
        .lock()
        .await
        .clone()
        .ok_or_else(|| AppError::Checkpoint("no checkpoint to roll back to".into()))?;

    host.checkpoints.rollback(&token).await?;
    to_value(&RollbackResult { success: true })
}
