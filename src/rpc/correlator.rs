//! Request/response correlation.
//!
//! The [`Correlator`] hands out connection-unique ids and keeps one
//! single-assignment completion slot per in-flight call. The reader task
//! routes every inbound frame through [`Correlator::resolve`], which fulfils
//! the matching slot exactly once and forgets it.
//!
//! Responses may arrive in any order; matching is by id only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::rpc::Frame;
use crate::{AppError, Result};

type Completion = oneshot::Sender<Result<Value>>;

/// Outcome of routing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the frame.
    Delivered,
    /// The slot existed but its caller had already stopped waiting.
    Abandoned,
    /// No pending call with this id (never issued, or already resolved).
    UnknownId,
    /// Frame without an id; nothing to resolve.
    Ignored,
    /// Frame was malformed and dropped.
    Anomaly,
}

#[derive(Debug, Default)]
struct PendingState {
    calls: HashMap<u64, Completion>,
    closed: Option<String>,
}

/// Pending-call bookkeeping shared by the client and the reader task.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicU64,
    state: Mutex<PendingState>,
}

/// Handle to one registered call.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingCall {
    /// Correlation id of this call.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until the slot is fulfilled.
    ///
    /// # Errors
    ///
    /// Returns the peer's [`AppError::Rpc`] when it answered with an error
    /// frame, or [`AppError::Closed`] when the connection went away first.
    pub async fn wait(self) -> Result<Value> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::Closed(format!(
                "call {} dropped without a response",
                self.id
            ))),
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty correlator whose first id is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(PendingState::default()),
        }
    }

    /// Allocate the next id. Strictly increasing, never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a completion slot for `id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] when the connection has already shut down.
    /// - [`AppError::Internal`] when `id` is already pending; ids come from
    ///   [`Self::next_id`], so this indicates a bug in the caller.
    pub async fn register(&self, id: u64) -> Result<PendingCall> {
        let mut state = self.state.lock().await;

        if let Some(reason) = &state.closed {
            return Err(AppError::Closed(reason.clone()));
        }

        if state.calls.contains_key(&id) {
            return Err(AppError::Internal(format!("request id {id} registered twice")));
        }

        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok(PendingCall { id, rx })
    }

    /// Route one inbound frame to its waiting caller.
    ///
    /// Never fails: unknown ids, duplicates, and malformed frames are logged
    /// and dropped so the reader loop keeps running.
    pub async fn resolve(&self, frame: Frame) -> Resolution {
        let (id, outcome) = match frame {
            Frame::Result { id, result } => (id, Ok(result)),
            Frame::Error { id, error } => (
                id,
                Err(AppError::Rpc {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                }),
            ),
            Frame::Unaddressed(value) => {
                debug!(frame = %value, "correlator: frame without id ignored");
                return Resolution::Ignored;
            }
            Frame::Anomaly { id, reason } => {
                warn!(?id, reason, "correlator: dropping malformed frame");
                return Resolution::Anomaly;
            }
        };

        let slot = self.state.lock().await.calls.remove(&id);

        let Some(tx) = slot else {
            warn!(id, "correlator: response for unknown or already resolved request");
            return Resolution::UnknownId;
        };

        if tx.send(outcome).is_err() {
            debug!(id, "correlator: caller stopped waiting before the response arrived");
            return Resolution::Abandoned;
        }

        Resolution::Delivered
    }

    /// Forget a pending call whose caller gave up (for example on timeout).
    ///
    /// Returns `true` when a slot was removed.
    pub async fn cancel(&self, id: u64) -> bool {
        self.state.lock().await.calls.remove(&id).is_some()
    }

    /// Fail every pending call with [`AppError::Closed`] and refuse new ones.
    ///
    /// Idempotent; the first reason wins.
    pub async fn close(&self, reason: &str) {
        let drained: Vec<(u64, Completion)> = {
            let mut state = self.state.lock().await;
            if state.closed.is_none() {
                state.closed = Some(reason.to_owned());
            }
            state.calls.drain().collect()
        };

        if !drained.is_empty() {
            warn!(
                pending = drained.len(),
                reason, "correlator: failing pending calls on close"
            );
        }

        for (id, tx) in drained {
            if tx.send(Err(AppError::Closed(reason.to_owned()))).is_err() {
                debug!(id, "correlator: caller already gone at close");
            }
        }
    }

    /// Whether [`Self::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed.is_some()
    }

    /// Number of calls currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }
}
