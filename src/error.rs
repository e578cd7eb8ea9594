//! Error types for the tag cache.

use crate::remote::TransportError;
use crate::types::TagId;
use thiserror::Error;

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Incorrect rule expression received for tag {tag_id}: {reason}")]
    RuleFormat { tag_id: TagId, reason: String },

    #[error("Cache synchronization failed: {0}")]
    Synchronization(String),
}

impl CacheError {
    /// True for errors caused by the broker or network.
    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::InvalidArgument(e.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
