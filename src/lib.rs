#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! JSON-RPC stdio bridge between a repository-owning host and an analysis
//! sidecar, with checkpoint-protected diff application and session-keyed
//! refactor plans.

pub mod config;
pub mod diff;
pub mod errors;
pub mod host;
pub mod plans;
pub mod rpc;
pub mod sidecar;
pub mod workflow;

pub use config::BridgeConfig;
pub use errors::{AppError, ErrorKind, Result};
