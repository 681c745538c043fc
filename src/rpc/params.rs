//! Typed parameters and results for every method in the host method table.
//!
//! | method            | params                                   | result                    |
//! |-------------------|------------------------------------------|---------------------------|
//! | `initialize`      | [`InitializeParams`]                     | [`InitializeResult`]      |
//! | `shutdown`        | none                                     | `{status}`                |
//! | `list_files`      | [`ListFilesParams`]                      | [`ListFilesResult`]       |
//! | `read_file`       | [`PathParams`]                           | [`ReadFileResult`]        |
//! | `get_symbols`     | [`SourceParams`]                         | [`SymbolsResult`]         |
//! | `get_complexity`  | [`SourceParams`]                         | [`ComplexityResult`]      |
//! | `find_references` | [`ReferencesParams`]                     | [`ReferencesResult`]      |
//! | `apply_diff`      | [`ApplyDiffParams`]                      | [`ApplyDiffResult`]       |
//! | `apply_diff_safe` | [`ApplyDiffSafeParams`]                  | [`SafeApplyOutcome`]      |
//! | `run_tests`       | none                                     | [`TestReport`]            |
//! | `git_checkpoint`  | [`CheckpointParams`]                     | [`CheckpointResult`]      |
//! | `git_rollback`    | none                                     | [`RollbackResult`]        |
//!
//! [`SafeApplyOutcome`]: crate::workflow::SafeApplyOutcome
//! [`TestReport`]: crate::workflow::test_runner::TestReport

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Default commit message for `git_checkpoint`.
pub const DEFAULT_CHECKPOINT_MESSAGE: &str = "checkpoint before refactoring";

/// `initialize` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeParams {
    /// Repository root the sidecar will work on.
    pub root_dir: String,
}

/// `list_files` parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilesParams {
    /// Glob patterns a file must match (any of); empty means all files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    /// Glob patterns that exclude a file (any of).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
}

/// Parameters that name a single workspace file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathParams {
    /// Workspace-relative path.
    pub path: String,
}

/// Parameters for analysis methods that accept inline content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceParams {
    /// Workspace-relative path.
    pub path: String,
    /// Content to analyze instead of the file on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// `find_references` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferencesParams {
    /// Workspace-relative path.
    pub path: String,
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// `apply_diff` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyDiffParams {
    /// Workspace-relative path of the target file.
    pub path: String,
    /// Unified diff.
    pub diff: String,
    /// Plan session this change belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `apply_diff_safe` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyDiffSafeParams {
    /// Workspace-relative path of the target file.
    pub path: String,
    /// Unified diff.
    pub diff: String,
    /// Run the test suite after applying.
    #[serde(default = "default_true")]
    pub run_tests: bool,
    /// Plan session this change belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// `git_checkpoint` parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointParams {
    /// Commit message for the checkpoint.
    #[serde(default = "default_checkpoint_message")]
    pub message: String,
}

impl CheckpointParams {
    /// Parameters for `message`; a blank message becomes
    /// [`DEFAULT_CHECKPOINT_MESSAGE`].
    #[must_use]
    pub fn new(message: &str) -> Self {
        if message.trim().is_empty() {
            Self::default()
        } else {
            Self {
                message: message.to_owned(),
            }
        }
    }
}

impl Default for CheckpointParams {
    fn default() -> Self {
        Self {
            message: default_checkpoint_message(),
        }
    }
}

fn default_checkpoint_message() -> String {
    DEFAULT_CHECKPOINT_MESSAGE.to_owned()
}

/// One request, discriminated by method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodParams {
    /// `initialize`
    Initialize(InitializeParams),
    /// `shutdown`
    Shutdown,
    /// `list_files`
    ListFiles(ListFilesParams),
    /// `read_file`
    ReadFile(PathParams),
    /// `get_symbols`
    GetSymbols(SourceParams),
    /// `get_complexity`
    GetComplexity(SourceParams),
    /// `find_references`
    FindReferences(ReferencesParams),
    /// `apply_diff`
    ApplyDiff(ApplyDiffParams),
    /// `apply_diff_safe`
    ApplyDiffSafe(ApplyDiffSafeParams),
    /// `run_tests`
    RunTests,
    /// `git_checkpoint`
    GitCheckpoint(CheckpointParams),
    /// `git_rollback`
    GitRollback,
}

impl MethodParams {
    /// Wire name of the method.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Shutdown => "shutdown",
            Self::ListFiles(_) => "list_files",
            Self::ReadFile(_) => "read_file",
            Self::GetSymbols(_) => "get_symbols",
            Self::GetComplexity(_) => "get_complexity",
            Self::FindReferences(_) => "find_references",
            Self::ApplyDiff(_) => "apply_diff",
            Self::ApplyDiffSafe(_) => "apply_diff_safe",
            Self::RunTests => "run_tests",
            Self::GitCheckpoint(_) => "git_checkpoint",
            Self::GitRollback => "git_rollback",
        }
    }

    /// Parse wire `params` for `method`.
    ///
    /// A missing or `null` params value is treated as `{}`.
    ///
    /// # Errors
    ///
    /// - [`AppError::MethodNotFound`] for a name outside the method table.
    /// - [`AppError::InvalidParams`] when `params` does not fit the schema.
    pub fn parse(method: &str, params: Value) -> Result<Self> {
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };

        let parsed = match method {
            "initialize" => Self::Initialize(from_params(method, params)?),
            "shutdown" => Self::Shutdown,
            "list_files" => Self::ListFiles(from_params(method, params)?),
            "read_file" => Self::ReadFile(from_params(method, params)?),
            "get_symbols" => Self::GetSymbols(from_params(method, params)?),
            "get_complexity" => Self::GetComplexity(from_params(method, params)?),
            "find_references" => Self::FindReferences(from_params(method, params)?),
            "apply_diff" => Self::ApplyDiff(from_params(method, params)?),
            "apply_diff_safe" => Self::ApplyDiffSafe(from_params(method, params)?),
            "run_tests" => Self::RunTests,
            "git_checkpoint" => {
                let raw: CheckpointParams = from_params(method, params)?;
                Self::GitCheckpoint(CheckpointParams::new(&raw.message))
            }
            "git_rollback" => Self::GitRollback,
            other => return Err(AppError::MethodNotFound(other.to_owned())),
        };

        Ok(parsed)
    }

    /// Check the parameters against the method's constraints.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidParams`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Initialize(p) => require_non_empty("root_dir", &p.root_dir),
            Self::ListFiles(p) => {
                for pattern in p.include_patterns.iter().chain(&p.exclude_patterns) {
                    glob::Pattern::new(pattern).map_err(|e| {
                        AppError::InvalidParams(format!("invalid glob pattern {pattern:?}: {e}"))
                    })?;
                }
                Ok(())
            }
            Self::ReadFile(p) => require_non_empty("path", &p.path),
            Self::GetSymbols(p) | Self::GetComplexity(p) => require_non_empty("path", &p.path),
            Self::FindReferences(p) => {
                require_non_empty("path", &p.path)?;
                if p.line == 0 {
                    return Err(AppError::InvalidParams("line is 1-based; got 0".into()));
                }
                Ok(())
            }
            Self::ApplyDiff(p) => {
                require_non_empty("path", &p.path)?;
                require_non_empty("diff", &p.diff)?;
                require_session(p.session_id.as_deref())
            }
            Self::ApplyDiffSafe(p) => {
                require_non_empty("path", &p.path)?;
                require_non_empty("diff", &p.diff)?;
                require_session(p.session_id.as_deref())
            }
            Self::Shutdown | Self::RunTests | Self::GitCheckpoint(_) | Self::GitRollback => Ok(()),
        }
    }

    /// Serialize the parameters to their wire object.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Initialize(p) => serde_json::to_value(p),
            Self::ListFiles(p) => serde_json::to_value(p),
            Self::ReadFile(p) => serde_json::to_value(p),
            Self::GetSymbols(p) | Self::GetComplexity(p) => serde_json::to_value(p),
            Self::FindReferences(p) => serde_json::to_value(p),
            Self::ApplyDiff(p) => serde_json::to_value(p),
            Self::ApplyDiffSafe(p) => serde_json::to_value(p),
            Self::GitCheckpoint(p) => serde_json::to_value(p),
            Self::Shutdown | Self::RunTests | Self::GitRollback => Ok(Value::Object(Map::new())),
        };
        value.map_err(|e| AppError::Internal(format!("params serialization failed: {e}")))
    }
}

fn from_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidParams(format!("{method}: {e}")))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(AppError::InvalidParams(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

fn require_session(session_id: Option<&str>) -> Result<()> {
    match session_id {
        Some(id) => require_non_empty("session_id", id),
        None => Ok(()),
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitializeResult {
    /// `"initialized"` on success.
    pub status: String,
    /// Host version.
    #[serde(default)]
    pub version: Option<String>,
    /// Methods served by the host.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// One entry of a `list_files` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Workspace-relative path with `/` separators.
    pub path: String,
    /// SHA-256 of the content, hex encoded.
    #[serde(default)]
    pub hash: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// `list_files` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListFilesResult {
    /// Matching files, sorted by path.
    pub files: Vec<FileEntry>,
    /// Number of entries in `files`.
    pub total: usize,
}

/// `read_file` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadFileResult {
    /// File content.
    pub content: String,
    /// SHA-256 of the content, hex encoded.
    pub hash: String,
}

/// Symbol reported by `get_symbols`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name.
    pub name: String,
    /// Symbol kind (`function`, `class`, `method`, …).
    #[serde(rename = "type")]
    pub kind: String,
    /// First line, 1-based.
    pub start_line: u32,
    /// Last line, 1-based.
    pub end_line: u32,
    /// Declaration text.
    #[serde(default)]
    pub signature: Option<String>,
}

/// `get_symbols` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymbolsResult {
    /// Extracted symbols.
    pub symbols: Vec<Symbol>,
}

/// Complexity metrics reported by `get_complexity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplexityMetrics {
    /// Branch-count complexity.
    #[serde(default)]
    pub cyclomatic_complexity: u32,
    /// Nesting-weighted complexity.
    #[serde(default)]
    pub cognitive_complexity: u32,
    /// Line count.
    #[serde(default)]
    pub lines_of_code: u32,
    /// Any additional metrics the peer reports.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `get_complexity` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplexityResult {
    /// Metrics for the requested file.
    pub metrics: ComplexityMetrics,
}

/// `find_references` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferencesResult {
    /// Reference locations as reported by the peer.
    #[serde(default)]
    pub references: Vec<Value>,
}

/// `apply_diff` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyDiffResult {
    /// Whether the diff was written.
    pub success: bool,
    /// Target path.
    #[serde(default)]
    pub path: Option<String>,
}

/// `git_checkpoint` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Whether the checkpoint was recorded.
    pub success: bool,
    /// Token that restores this state.
    pub commit_hash: String,
}

/// `git_rollback` result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RollbackResult {
    /// Whether the rollback completed.
    pub success: bool,
}
