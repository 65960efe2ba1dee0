//! Error types for tree operations.

use curvetree_cycle::CycleError;
use thiserror::Error;

/// Alias for `core::result::Result<T, CurveTreeError>`.
pub type Result<T> = core::result::Result<T, CurveTreeError>;

/// Errors from building, trimming, or auditing the tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurveTreeError {
    /// A curve operation failed.
    #[error(transparent)]
    Cycle(#[from] CycleError),
    /// Invalid input parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Supplied tree state contradicts itself. The tree this state came from
    /// must be considered corrupt.
    #[error("inconsistent tree state: {0}")]
    InconsistentTree(String),
}
