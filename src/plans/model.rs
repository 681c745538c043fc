//! Refactor plan records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One proposed edit to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Workspace-relative target path.
    pub path: String,
    /// Text to replace; empty means "create `path` with `modified`".
    #[serde(default)]
    pub original: String,
    /// Replacement text.
    pub modified: String,
    /// What the change does.
    #[serde(default)]
    pub description: String,
}

impl FileChange {
    /// Whether this change creates a new file.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        self.original.is_empty()
    }
}

/// An ordered batch of changes awaiting application, keyed by session.
///
/// Immutable once created; the store hands out shared references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorPlan {
    /// Unique session token (UUID v4).
    pub session_id: String,
    /// Changes, applied in this order.
    pub changes: Vec<FileChange>,
    /// What the plan achieves.
    pub description: String,
    /// Refactoring pattern the plan follows, if any.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl RefactorPlan {
    /// Create a plan with a fresh session id.
    #[must_use]
    pub fn new(changes: Vec<FileChange>, description: impl Into<String>, pattern: Option<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            changes,
            description: description.into(),
            pattern,
            created_at: Utc::now(),
        }
    }

    /// Plan age at `now`; zero when `created_at` lies in the future.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}
