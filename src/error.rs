//! Error types for emd-approx

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors reported before any solver work starts.
///
/// Infeasibility is deliberately *not* an error: a problem whose minimum
/// achievable EMD cost exceeds the upper bound yields a successful
/// [`SolveResult`](crate::SolveResult) with an empty support mask.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid input data
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch in input
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        got: usize,
    },

    /// Algorithm name not in the closed backend set
    #[error("unknown algorithm: {0:?}")]
    UnknownAlgorithm(String),

    /// Backend is part of the closed set but not compiled into this build
    #[error("backend not available in this build: {0}")]
    BackendUnavailable(&'static str),

    /// Internal error (bug)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
