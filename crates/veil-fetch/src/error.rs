//! Fetch errors.

use serde::{Deserialize, Serialize};

/// Errors from fetching a resource.
///
/// Retryable failures ([`Status`](Self::Status) and
/// [`Transport`](Self::Transport)) only surface from a single attempt;
/// the retry loop turns them into [`RetriesExhausted`](Self::RetriesExhausted)
/// once it gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FetchError {
    /// A client-error status that retrying cannot fix.
    #[error("non-retryable HTTP status {status}")]
    NonRetryable { status: u16 },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// A non-success status outside the non-retryable set.
    #[error("HTTP status {status}")]
    Status { status: u16 },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request URL could not be built.
    #[error("invalid URL {0:?}")]
    InvalidUrl(String),

    /// The pool stopped admitting requests.
    #[error("fetch pool is closed")]
    PoolClosed,
}

impl FetchError {
    /// Returns `true` if another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_))
    }

    /// Variant name, used as the error class on the wire.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::NonRetryable { .. } => "NonRetryableError",
            Self::RetriesExhausted { .. } => "RetriesExhausted",
            Self::Status { .. } => "Status",
            Self::Transport(_) => "Transport",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::PoolClosed => "PoolClosed",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
