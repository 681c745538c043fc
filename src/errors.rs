//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

use crate::rpc::codes;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Output stream write failure or broken input stream.
    Transport(String),
    /// Connection closed while a call was pending.
    Closed(String),
    /// A call was issued before the transport was established or after shutdown.
    NotConnected,
    /// A call exceeded its caller-supplied deadline.
    Timeout(String),
    /// The peer sent a frame that violates JSON-RPC framing rules.
    Protocol(String),
    /// The peer answered with an explicit JSON-RPC error frame.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message from the peer.
        message: String,
        /// Optional structured payload from the peer.
        data: Option<serde_json::Value>,
    },
    /// Method parameters failed local validation.
    InvalidParams(String),
    /// Requested method is not served.
    MethodNotFound(String),
    /// Diff parsing or file-write failure.
    Diff(String),
    /// Patch application failed due to content divergence.
    PatchConflict(String),
    /// File system path failed validation against workspace root.
    PathViolation(String),
    /// Checkpoint creation or rollback failure.
    Checkpoint(String),
    /// Test command could not be executed.
    TestRun(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Entity already exists and must not be overwritten.
    AlreadyExists(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Programmer error: an invariant inside this process was broken.
    Internal(String),
}

/// Coarse classification used by callers to decide how to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The stream is broken, closed, or a deadline expired.
    Transport,
    /// The peer violated the wire protocol.
    Protocol,
    /// The peer reported a failure for a well-formed request.
    Peer,
    /// A checkpoint, apply, or test step failed.
    Workflow,
    /// Unknown or duplicate session plan.
    Session,
    /// Local validation, configuration, or file-system failure.
    Local,
    /// Broken internal invariant; not meant to be handled.
    Fatal,
}

impl ErrorKind {
    /// Stable lowercase name used in result envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Peer => "peer",
            Self::Workflow => "workflow",
            Self::Session => "session",
            Self::Local => "local",
            Self::Fatal => "fatal",
        }
    }
}

impl AppError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Closed(_) | Self::NotConnected | Self::Timeout(_) => {
                ErrorKind::Transport
            }
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Rpc { .. } => ErrorKind::Peer,
            Self::Diff(_) | Self::PatchConflict(_) | Self::Checkpoint(_) | Self::TestRun(_) => {
                ErrorKind::Workflow
            }
            Self::NotFound(_) | Self::AlreadyExists(_) => ErrorKind::Session,
            Self::Config(_)
            | Self::InvalidParams(_)
            | Self::MethodNotFound(_)
            | Self::PathViolation(_)
            | Self::Io(_) => ErrorKind::Local,
            Self::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Rpc { .. })
    }

    /// JSON-RPC error code used when this error is reported to a peer.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Rpc { code, .. } => *code,
            Self::Protocol(_) => codes::INVALID_REQUEST,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::NotFound(_) => codes::FILE_NOT_FOUND,
            Self::Diff(_) | Self::PatchConflict(_) => codes::PATCH_FAILURE,
            Self::TestRun(_) => codes::TEST_FAILURE,
            Self::Checkpoint(_) => codes::CHECKPOINT_FAILURE,
            Self::PathViolation(_) => codes::PATH_VIOLATION,
            _ => codes::INTERNAL_ERROR,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Closed(msg) => write!(f, "connection closed: {msg}"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Rpc { code, message, .. } => write!(f, "rpc error {code}: {message}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::MethodNotFound(msg) => write!(f, "method not found: {msg}"),
            Self::Diff(msg) => write!(f, "diff: {msg}"),
            Self::PatchConflict(msg) => write!(f, "patch conflict: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint: {msg}"),
            Self::TestRun(msg) => write!(f, "test run: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
