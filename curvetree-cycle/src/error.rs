//! Error types for curve cycle operations.

use thiserror::Error;

/// Alias for `core::result::Result<T, CycleError>`.
pub type Result<T> = core::result::Result<T, CycleError>;

/// Errors from curve cycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CycleError {
    /// A 32-byte encoding did not decode to a curve point.
    #[error("invalid point encoding: {0}")]
    InvalidPoint(String),
    /// A chunk hash addressed generators past the configured range.
    #[error("chunk exceeds generator range: {0}")]
    GeneratorRange(String),
    /// Invalid input parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
