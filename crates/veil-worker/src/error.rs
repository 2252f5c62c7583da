//! Worker errors and the wire error envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veil_fetch::FetchError;
use veil_pipeline::DecodeError;

/// Errors raised inside the worker.
///
/// Per-label failures are logged and reported as skipped labels; only
/// stream failures leave the worker as an [`ErrorEnvelope`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// An inbound message named a method the worker does not handle.
    #[error("unknown method {0:?}")]
    UnknownMethod(String),

    /// An inbound message did not match its method's shape.
    #[error("malformed message: {0}")]
    Protocol(#[from] serde_json::Error),

    /// A label's `_cls` or schema type is not a known label class.
    #[error("unknown label class {0:?}")]
    UnknownLabelClass(String),

    /// Fetching a mask or a frame chunk failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A fetched or inline mask could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The frame stream was replaced or dropped.
    #[error("stream was cancelled")]
    StreamCancelled,

    /// The worker or one of its services has shut down.
    #[error("worker channel is closed")]
    Closed,

    /// A blocking decode task panicked or was cancelled.
    #[error("decode task failed: {0}")]
    TaskFailed(String),
}

impl WorkerError {
    /// Class name reported in [`ErrorEnvelope::cls`].
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::UnknownMethod(_) => "UnknownMethod",
            Self::Protocol(_) => "Protocol",
            Self::UnknownLabelClass(_) => "UnknownLabelClass",
            Self::Fetch(e) => e.class(),
            Self::Decode(_) => "DecodeError",
            Self::StreamCancelled => "StreamCancelled",
            Self::Closed => "Closed",
            Self::TaskFailed(_) => "TaskFailed",
        }
    }
}

impl From<tokio::task::JoinError> for WorkerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskFailed(e.to_string())
    }
}

/// Serialized error posted to the consumer for stream-level failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Error class, e.g. `NonRetryableError`.
    pub cls: String,
    /// Structured details, `null` when there are none.
    pub data: Value,
    /// Human-readable message.
    pub message: String,
}

impl From<&WorkerError> for ErrorEnvelope {
    fn from(error: &WorkerError) -> Self {
        let data = match error {
            WorkerError::Fetch(e) => serde_json::to_value(e).unwrap_or(Value::Null),
            WorkerError::Decode(e) => serde_json::to_value(e).unwrap_or(Value::Null),
            WorkerError::UnknownMethod(s) | WorkerError::UnknownLabelClass(s) => {
                Value::String(s.clone())
            }
            _ => Value::Null,
        };
        Self {
            cls: error.class().to_owned(),
            data,
            message: error.to_string(),
        }
    }
}
