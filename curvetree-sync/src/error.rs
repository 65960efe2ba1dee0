//! Error types for block syncing.

use curvetree::CurveTreeError;
use thiserror::Error;

/// Alias for `core::result::Result<T, TreeSyncError>`.
pub type Result<T> = core::result::Result<T, TreeSyncError>;

/// Errors from syncing blocks against the cached tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeSyncError {
    /// A synced block does not follow the cached chain tip.
    #[error("block does not extend the synced chain: {0}")]
    Contiguity(String),
    /// Cached chunks contradict the expected tree shape. The cache must be
    /// rebuilt from scratch.
    #[error("cache consistency: {0}")]
    CacheConsistency(String),
    /// Invalid input parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A tree operation failed.
    #[error(transparent)]
    Tree(#[from] CurveTreeError),
}
