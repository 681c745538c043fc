//! Bridge configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How the host records checkpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    /// Commits in the workspace git repository.
    #[default]
    Git,
    /// In-memory file copies; no repository needed.
    Snapshot,
}

/// The analysis sidecar process spawned by `reducto-bridge spawn`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SidecarConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// How long the sidecar may take to send its first request.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_test_command() -> Vec<String> {
    ["python", "-m", "pytest", "-x", "-q"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_test_timeout() -> u64 {
    60
}

fn default_symbol_timeout() -> u64 {
    5
}

fn default_plan_ttl() -> u64 {
    3600
}

/// Configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Repository the host operates on.
    pub workspace_root: PathBuf,
    /// Test command: program followed by arguments.
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,
    /// Bound on one test run.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_seconds: u64,
    /// Bound on every client call; 0 means none.
    #[serde(default)]
    pub call_timeout_seconds: u64,
    /// Bound on `get_symbols` calls.
    #[serde(default = "default_symbol_timeout")]
    pub symbol_timeout_seconds: u64,
    /// Checkpoint backend.
    #[serde(default)]
    pub checkpoint_backend: CheckpointBackend,
    /// Lifetime of a stored plan.
    #[serde(default = "default_plan_ttl")]
    pub plan_ttl_seconds: u64,
    /// Sidecar process, if the host should spawn one.
    #[serde(default)]
    pub sidecar: Option<SidecarConfig>,
}

impl BridgeConfig {
    /// Defaults for `workspace_root`, validated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the workspace root does not exist.
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            workspace_root: workspace_root.into(),
            test_command: default_test_command(),
            test_timeout_seconds: default_test_timeout(),
            call_timeout_seconds: 0,
            symbol_timeout_seconds: default_symbol_timeout(),
            checkpoint_backend: CheckpointBackend::default(),
            plan_ttl_seconds: default_plan_ttl(),
            sidecar: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Point the configuration at another workspace and re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `root` does not exist.
    pub fn override_workspace(&mut self, root: impl Into<PathBuf>) -> Result<()> {
        self.workspace_root = root.into();
        self.validate()
    }

    /// Bound on one test run.
    #[must_use]
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_seconds)
    }

    /// Bound on every client call, if any.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_seconds > 0).then(|| Duration::from_secs(self.call_timeout_seconds))
    }

    /// Bound on `get_symbols` calls.
    #[must_use]
    pub fn symbol_timeout(&self) -> Duration {
        Duration::from_secs(self.symbol_timeout_seconds)
    }

    /// Lifetime of a stored plan.
    #[must_use]
    pub fn plan_ttl(&self) -> Duration {
        Duration::from_secs(self.plan_ttl_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        match self.test_command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => return Err(AppError::Config("test_command must not be empty".into())),
        }

        if self.test_timeout_seconds == 0 {
            return Err(AppError::Config(
                "test_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.symbol_timeout_seconds == 0 {
            return Err(AppError::Config(
                "symbol_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.plan_ttl_seconds == 0 {
            return Err(AppError::Config(
                "plan_ttl_seconds must be greater than zero".into(),
            ));
        }

        if let Some(sidecar) = &self.sidecar {
            if sidecar.command.trim().is_empty() {
                return Err(AppError::Config("sidecar.command must not be empty".into()));
            }
        }

        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
