//! Sidecar process spawner.
//!
//! Spawns the analysis sidecar with:
//! - `kill_on_drop(true)` so the process never outlives the host;
//! - `env_clear()` plus an allowlist so host secrets stay out of the child;
//! - stderr inherited, so sidecar logs land next to the host's;
//! - a startup window: the sidecar must write something (its first request)
//!   before `startup_timeout` or it is killed.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::config::SidecarConfig;
use crate::{AppError, Result};

/// Environment variables inherited by the sidecar.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    "VIRTUAL_ENV",
    "PYTHONPATH",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// How long [`terminate`] waits after SIGTERM before killing.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A running sidecar and its protocol pipes.
///
/// `stdout` is buffered and already holds the sidecar's first bytes.
#[derive(Debug)]
pub struct SidecarProcess {
    /// Child handle; dropping it kills the process.
    pub child: Child,
    /// Host → sidecar frames.
    pub stdin: ChildStdin,
    /// Sidecar → host frames.
    pub stdout: BufReader<ChildStdout>,
}

/// Spawn the sidecar in `workspace_root` and wait for its first output.
///
/// # Errors
///
/// - `AppError::Transport("failed to spawn sidecar: …")`: OS spawn failure.
/// - `AppError::Timeout`: nothing written within the startup window.
/// - `AppError::Closed`: the sidecar exited before writing anything.
pub async fn spawn_sidecar(config: &SidecarConfig, workspace_root: &Path) -> Result<SidecarProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("PYTHONUNBUFFERED", "1");
    cmd.env("REDUCTO_WORKSPACE", workspace_root);

    cmd.current_dir(workspace_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Transport(format!("failed to spawn sidecar: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture sidecar stdin".into()))?;
    let stdout_raw = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Transport("failed to capture sidecar stdout".into()))?;

    let mut stdout = BufReader::new(stdout_raw);
    let startup_timeout = Duration::from_secs(config.startup_timeout_seconds);

    // `fill_buf` waits for the first bytes without consuming them; the serve
    // loop reads them as the first request.
    match tokio::time::timeout(startup_timeout, stdout.fill_buf()).await {
        Ok(Ok(buf)) if !buf.is_empty() => {
            info!(command = %config.command, pid = ?child.id(), "sidecar started");
        }
        Ok(Ok(_)) => {
            return Err(AppError::Closed(
                "sidecar exited before sending anything".into(),
            ));
        }
        Ok(Err(err)) => {
            return Err(AppError::Transport(format!(
                "failed to read from sidecar: {err}"
            )));
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            return Err(AppError::Timeout(format!(
                "sidecar wrote nothing within {startup_timeout:?}"
            )));
        }
    }

    Ok(SidecarProcess {
        child,
        stdin,
        stdout,
    })
}

/// Stop the sidecar: SIGTERM, then kill after `grace`.
///
/// Returns the exit status when it could be collected.
pub async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                warn!(pid, %err, "failed to send SIGTERM to sidecar");
            }
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(err)) => {
            warn!(%err, "error waiting for sidecar exit");
            None
        }
        Err(_elapsed) => {
            warn!(?grace, "sidecar ignored SIGTERM, killing");
            child.kill().await.ok();
            child.wait().await.ok()
        }
    }
}
