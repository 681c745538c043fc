//! JSON-RPC 2.0 transport between the host and the analysis sidecar.
//!
//! Messages travel as newline-delimited JSON over a stdio pair. The client
//! side is split into cooperating pieces:
//!
//! - `codec`: line framing with a hard per-line limit.
//! - `writer`: the single task that owns the output stream.
//! - `reader`: the background task that drains the input stream and routes
//!   every decoded frame to the correlator.
//! - `correlator`: id allocation and pending-call bookkeeping.
//! - `client`: the typed call surface.
//! - `params`: one parameter type per method, validated before sending.

pub mod client;
pub mod codec;
pub mod correlator;
pub mod params;
pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used on the wire.
pub mod codes {
    /// Line was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Frame is JSON but not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method is not served by the peer.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Parameters did not match the method schema.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Catch-all server failure.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Target file does not exist.
    pub const FILE_NOT_FOUND: i64 = -32001;
    /// Diff could not be parsed or applied.
    pub const PATCH_FAILURE: i64 = -32002;
    /// Test command could not be run.
    pub const TEST_FAILURE: i64 = -32003;
    /// Version-control checkpoint or rollback failed.
    pub const CHECKPOINT_FAILURE: i64 = -32004;
    /// Path escapes the workspace root.
    pub const PATH_VIOLATION: i64 = -32005;
}

/// Outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Correlation id, unique per connection.
    pub id: u64,
    /// Operation name.
    pub method: String,
    /// Operation parameters (always an object).
    pub params: Value,
}

impl Request {
    /// Build a request frame for `method`.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by an error frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response frame as written by the host.
///
/// Exactly one of `result` and `error` is set. `id` is `null` when the
/// offending request could not be parsed far enough to recover it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Echo of the request id.
    pub id: Value,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Successful response for `id`.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response for `id`.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// Classified inbound frame as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Successful reply to request `id`.
    Result {
        /// Correlation id.
        id: u64,
        /// Result payload.
        result: Value,
    },
    /// Error reply to request `id`.
    Error {
        /// Correlation id.
        id: u64,
        /// Error payload.
        error: ErrorObject,
    },
    /// Frame without an id (notification, or an error about an unparsable line).
    Unaddressed(Value),
    /// Frame that carries an id but cannot be resolved (neither result nor
    /// error, non-integer id, or a request from the peer).
    Anomaly {
        /// The raw id, if any.
        id: Option<Value>,
        /// Why the frame was rejected.
        reason: String,
    },
}

impl Frame {
    /// Classify a decoded JSON document.
    #[must_use]
    pub fn classify(mut value: Value) -> Self {
        let Some(obj) = value.as_object_mut() else {
            return Self::Anomaly {
                id: None,
                reason: "frame is not a JSON object".into(),
            };
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => return Self::Unaddressed(value),
            Some(id) => id,
        };

        if obj.contains_key("method") {
            return Self::Anomaly {
                id: Some(id),
                reason: "peer sent a request; this side does not serve methods".into(),
            };
        }

        let Some(numeric_id) = id.as_u64() else {
            return Self::Anomaly {
                id: Some(id),
                reason: "id is not a non-negative integer".into(),
            };
        };

        if let Some(raw_error) = obj.remove("error") {
            return match serde_json::from_value::<ErrorObject>(raw_error) {
                Ok(error) => Self::Error {
                    id: numeric_id,
                    error,
                },
                Err(err) => Self::Anomaly {
                    id: Some(id),
                    reason: format!("malformed error object: {err}"),
                },
            };
        }

        match obj.remove("result") {
            Some(result) => Self::Result {
                id: numeric_id,
                result,
            },
            None => Self::Anomaly {
                id: Some(id),
                reason: "frame carries neither result nor error".into(),
            },
        }
    }

    /// Numeric correlation id, when the frame is addressable.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => Some(*id),
            Self::Unaddressed(_) | Self::Anomaly { .. } => None,
        }
    }
}
