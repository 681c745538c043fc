//! Session-keyed refactor plans.

pub mod model;
pub mod store;

pub use model::{FileChange, RefactorPlan};
pub use store::PlanStore;
