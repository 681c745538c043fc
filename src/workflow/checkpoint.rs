//! Restorable workspace checkpoints.
//!
//! A checkpoint token is opaque to callers: a commit hash for
//! [`GitCheckpoints`], a UUID for [`SnapshotCheckpoints`]. The only contract
//! is that `rollback(token)` restores file contents exactly as they were
//! when `checkpoint` returned that token.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Output;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::diff::{walk_workspace, write_atomic};
use crate::{AppError, Result};

/// Author identity used for checkpoint commits.
const COMMIT_IDENTITY: [&str; 4] = [
    "-c",
    "user.name=reducto-bridge",
    "-c",
    "user.email=reducto-bridge@localhost",
];

/// A backend that can snapshot the workspace and restore a snapshot.
pub trait CheckpointStore: Send + Sync {
    /// Record the current workspace state.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Checkpoint`] if the state cannot be recorded.
    fn checkpoint<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Restore the state recorded under `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Checkpoint`] for an unknown token or a failed restore.
    fn rollback<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Forget `token` once it can no longer be rolled back to.
    fn release<'a>(&'a self, _token: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// Checkpoints as git commits in the workspace repository.
#[derive(Debug, Clone)]
pub struct GitCheckpoints {
    workspace_root: PathBuf,
}

impl GitCheckpoints {
    /// Use the repository at `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .args(COMMIT_IDENTITY)
            .args(args)
            .current_dir(&self.workspace_root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| AppError::Checkpoint(format!("failed to run git: {err}")))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(AppError::Checkpoint(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl CheckpointStore for GitCheckpoints {
    fn checkpoint<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.git(&["add", "-A"]).await?;
            self.git(&["commit", "--allow-empty", "--no-verify", "-q", "-m", message])
                .await?;
            let head = self.git(&["rev-parse", "HEAD"]).await?;
            let token = String::from_utf8_lossy(&head.stdout).trim().to_owned();
            info!(commit = %token, "git checkpoint created");
            Ok(token)
        })
    }

    fn rollback<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.git(&["reset", "--hard", "-q", token]).await?;
            self.git(&["clean", "-fd", "-q"]).await?;
            info!(commit = token, "git rollback complete");
            Ok(())
        })
    }
}

type Snapshot = HashMap<PathBuf, Vec<u8>>;

/// Checkpoints held in memory as a copy of every workspace file.
///
/// Works without a repository; meant for small workspaces and tests.
#[derive(Debug)]
pub struct SnapshotCheckpoints {
    workspace_root: PathBuf,
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl SnapshotCheckpoints {
    /// Snapshot files under `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Number of snapshots currently held.
    pub async fn len(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    /// Whether no snapshot is held.
    pub async fn is_empty(&self) -> bool {
        self.snapshots.lock().await.is_empty()
    }
}

fn capture(root: &Path) -> Result<Snapshot> {
    let mut snapshot = HashMap::new();
    for rel in walk_workspace(root).map_err(|e| AppError::Checkpoint(e.to_string()))? {
        let content = std::fs::read(root.join(&rel)).map_err(|err| {
            AppError::Checkpoint(format!("cannot snapshot {}: {err}", rel.display()))
        })?;
        snapshot.insert(rel, content);
    }
    Ok(snapshot)
}

fn restore(root: &Path, snapshot: &Snapshot) -> Result<()> {
    let current = walk_workspace(root).map_err(|e| AppError::Checkpoint(e.to_string()))?;
    for rel in current {
        if !snapshot.contains_key(&rel) {
            std::fs::remove_file(root.join(&rel)).map_err(|err| {
                AppError::Checkpoint(format!("cannot remove {}: {err}", rel.display()))
            })?;
        }
    }

    for (rel, content) in snapshot {
        let target = root.join(rel);
        if std::fs::read(&target).is_ok_and(|existing| existing == *content) {
            continue;
        }
        write_atomic(&target, content)
            .map_err(|e| AppError::Checkpoint(format!("cannot restore {}: {e}", rel.display())))?;
    }
    Ok(())
}

impl CheckpointStore for SnapshotCheckpoints {
    fn checkpoint<'a>(
        &'a self,
        message: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let snapshot = capture(&self.workspace_root)?;
            let token = Uuid::new_v4().to_string();
            debug!(token, files = snapshot.len(), message, "snapshot checkpoint created");
            self.snapshots.lock().await.insert(token.clone(), snapshot);
            Ok(token)
        })
    }

    fn rollback<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let snapshots = self.snapshots.lock().await;
            let snapshot = snapshots
                .get(token)
                .ok_or_else(|| AppError::Checkpoint(format!("unknown checkpoint {token}")))?;
            restore(&self.workspace_root, snapshot)?;
            info!(token, "snapshot rollback complete");
            Ok(())
        })
    }

    fn release<'a>(&'a self, token: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.snapshots.lock().await.remove(token);
        })
    }
}
