//! Dense buffer utilities shared by the engine and the bundled models.
//!
//! Trajectories are stored as `N × n_x` matrices (one row per horizon stage);
//! decision sequences are flat vectors of length `N·(n_u + n_c)`. Everything
//! here works in place on preallocated storage.

use nalgebra::{DMatrix, DVector};

use crate::error::{ContinuationError, Result};

/// Allocates a zeroed `stages × dim` trajectory matrix.
pub fn new_trajectory(stages: usize, dim: usize) -> DMatrix<f64> {
    DMatrix::zeros(stages, dim)
}

/// Allocates a zeroed vector of length `dim`.
pub fn new_vector(dim: usize) -> DVector<f64> {
    DVector::zeros(dim)
}

/// Sum of squares of `values`.
pub fn squared_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

/// `out = base + scale * direction`, without allocating.
pub(crate) fn offset_into(
    out: &mut DVector<f64>,
    base: &DVector<f64>,
    scale: f64,
    direction: &DVector<f64>,
) {
    out.copy_from(base);
    out.axpy(scale, direction, 1.0);
}

/// `out = factor * source`, without allocating.
pub(crate) fn scaled_into(out: &mut DMatrix<f64>, source: &DMatrix<f64>, factor: f64) {
    out.copy_from(source);
    out.scale_mut(factor);
}

pub(crate) fn check_vector(what: &'static str, vector: &DVector<f64>, expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(ContinuationError::DimensionMismatch {
            what,
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_trajectory(
    what: &'static str,
    trajectory: &DMatrix<f64>,
    stages: usize,
    dim: usize,
) -> Result<()> {
    if trajectory.shape() != (stages, dim) {
        return Err(ContinuationError::ShapeMismatch {
            what,
            expected: (stages, dim),
            actual: trajectory.shape(),
        });
    }
    Ok(())
}
