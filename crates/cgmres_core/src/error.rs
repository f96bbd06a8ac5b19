use thiserror::Error;

/// Errors reported by the continuation engine.
///
/// Configuration and dimension errors are contract violations raised before
/// any arithmetic happens; a failing call never leaves partially updated
/// trajectories behind.
#[derive(Debug, Error)]
pub enum ContinuationError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("optimal control problem reports an invalid dimension: {name} = {value}")]
    InvalidDimension { name: &'static str, value: usize },

    #[error("{what} dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("step context was prepared by a different engine")]
    ForeignStep,

    #[error("stale step context: prepared at sequence {prepared}, engine is at {current}")]
    StaleStep { prepared: u64, current: u64 },

    #[error(transparent)]
    Problem(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ContinuationError>;
