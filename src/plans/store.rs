//! Session plan store.
//!
//! Plans are written once and read many times, so a read-write lock is
//! enough. Plans are dropped explicitly via [`PlanStore::remove`] (after a
//! fully successful apply) or once older than the store's TTL.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::plans::model::RefactorPlan;
use crate::{AppError, Result};

/// Default plan lifetime.
pub const DEFAULT_PLAN_TTL: Duration = Duration::from_secs(3600);

/// Process-wide map of session id to plan.
#[derive(Debug)]
pub struct PlanStore {
    plans: RwLock<HashMap<String, Arc<RefactorPlan>>>,
    ttl: Duration,
}

impl Default for PlanStore {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_TTL)
    }
}

impl PlanStore {
    /// Empty store whose plans expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Configured lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert `plan` under its session id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AlreadyExists`] if the session id is taken; the
    /// stored plan is left untouched.
    pub fn store(&self, plan: RefactorPlan) -> Result<Arc<RefactorPlan>> {
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        if plans.contains_key(&plan.session_id) {
            return Err(AppError::AlreadyExists(format!(
                "plan for session {} already stored",
                plan.session_id
            )));
        }

        let plan = Arc::new(plan);
        plans.insert(plan.session_id.clone(), Arc::clone(&plan));
        debug!(session_id = %plan.session_id, changes = plan.changes.len(), "plan stored");
        Ok(plan)
    }

    /// Plan for `session_id`, unless unknown or expired.
    #[must_use]
    pub fn lookup(&self, session_id: &str) -> Option<Arc<RefactorPlan>> {
        let plans = self.plans.read().unwrap_or_else(PoisonError::into_inner);
        plans
            .get(session_id)
            .filter(|plan| plan.age_at(Utc::now()) <= self.ttl)
            .cloned()
    }

    /// Like [`Self::lookup`], but a miss is an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown or expired session.
    pub fn require(&self, session_id: &str) -> Result<Arc<RefactorPlan>> {
        self.lookup(session_id)
            .ok_or_else(|| AppError::NotFound(format!("no plan for session {session_id}")))
    }

    /// Drop the plan for `session_id`. Returns `true` if one was stored.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self
            .plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some();
        if removed {
            debug!(session_id, "plan removed");
        }
        removed
    }

    /// Drop every plan older than the TTL. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut plans = self.plans.write().unwrap_or_else(PoisonError::into_inner);
        let before = plans.len();
        plans.retain(|_, plan| plan.age_at(now) <= self.ttl);
        let evicted = before - plans.len();
        if evicted > 0 {
            info!(evicted, remaining = plans.len(), "expired plans evicted");
        }
        evicted
    }

    /// Number of stored plans, expired ones included until evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no plans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
