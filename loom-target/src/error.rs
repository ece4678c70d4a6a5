//! Error types for compute-target collaborators

use thiserror::Error;

/// Result type alias for target operations
pub type Result<T> = std::result::Result<T, TargetError>;

/// Errors that can occur when talking to a compute target or its provider
#[derive(Debug, Error)]
pub enum TargetError {
    /// The provider rejected or failed an API call
    #[error("backend error: {0}")]
    Backend(String),

    /// The handle does not refer to a known provider resource
    #[error("unknown target handle: {0}")]
    UnknownHandle(String),

    /// The target is not reachable at its recorded address
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// An operation exceeded its deadline
    #[error("operation timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
}

impl TargetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
