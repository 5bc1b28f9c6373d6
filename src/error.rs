//! Error types for tree references, subscriptions and transactions.
//!
//! Validation errors (`InvalidPath`, `UnknownEventKind`) are raised
//! synchronously, before any call reaches the remote store. Everything the
//! store reports comes back as `Remote` or `Cancelled`.

use thiserror::Error;

/// Errors that can occur while working with the remote tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Empty or malformed path segment.
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidPath { segment: String, reason: String },

    /// Subscription requested with an unrecognized event kind.
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    /// Failure reported by the remote tree store.
    #[error("remote error: {0}")]
    Remote(String),

    /// The transport cancelled an active subscription or read.
    #[error("subscription cancelled: {0}")]
    Cancelled(String),

    /// The store rejected one or more unsubscribe calls during teardown.
    #[error("teardown failed for {failed} of {total} subscriptions: {reason}")]
    TeardownFailed {
        failed: usize,
        total: usize,
        reason: String,
    },

    /// Typed serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be parsed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

impl TreeError {
    pub(crate) fn invalid_path(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        TreeError::InvalidPath {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TreeError::Remote(_))
    }

    /// Returns true for errors raised before any remote call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TreeError::InvalidPath { .. } | TreeError::UnknownEventKind(_)
        )
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::Serialization(err.to_string())
    }
}
