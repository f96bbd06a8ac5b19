//! Per-sample step context.
//!
//! One control step runs `build_rhs` once, `apply_operator` any number of
//! times, then `integrate` once. The data cached by `build_rhs` travels in a
//! [`PreparedStep`], so the order is enforced by ownership:
//!
//! ```text
//! StepWorkspace --build_rhs--> PreparedStep --integrate--> StepWorkspace
//!                                   |
//!                             apply_operator (&)
//! ```
//!
//! The buffers are allocated once per engine and handed back and forth, so
//! steady-state operation never allocates.

use nalgebra::{DMatrix, DVector};

use super::types::Dimensions;
use crate::buffers::{new_trajectory, new_vector};

#[derive(Debug, Clone)]
pub(crate) struct StepBuffers {
    pub(crate) time: f64,
    pub(crate) incremented_time: f64,
    pub(crate) incremented_state: DVector<f64>,
    /// Stationarity residual at the base point.
    pub(crate) residual: DVector<f64>,
    /// Stationarity residual at `t + h` along the unmodified trajectories.
    pub(crate) incremented_residual: DVector<f64>,
    /// State/costate residuals at the base point.
    pub(crate) state_residual: DMatrix<f64>,
    pub(crate) costate_residual: DMatrix<f64>,
    /// State/costate residuals of the base trajectories at `t + h`.
    pub(crate) incremented_state_residual: DMatrix<f64>,
    pub(crate) incremented_costate_residual: DMatrix<f64>,
}

impl StepBuffers {
    fn new(dims: &Dimensions) -> Self {
        Self {
            time: 0.0,
            incremented_time: 0.0,
            incremented_state: new_vector(dims.state),
            residual: new_vector(dims.decision()),
            incremented_residual: new_vector(dims.decision()),
            state_residual: new_trajectory(dims.stages, dims.state),
            costate_residual: new_trajectory(dims.stages, dims.state),
            incremented_state_residual: new_trajectory(dims.stages, dims.state),
            incremented_costate_residual: new_trajectory(dims.stages, dims.state),
        }
    }
}

/// Idle step buffers, ready for the next `build_rhs`.
#[derive(Debug, Clone)]
pub struct StepWorkspace {
    pub(crate) engine_id: u64,
    pub(crate) buffers: StepBuffers,
}

impl StepWorkspace {
    pub(crate) fn new(engine_id: u64, dims: &Dimensions) -> Self {
        Self {
            engine_id,
            buffers: StepBuffers::new(dims),
        }
    }
}

/// Residuals cached by `build_rhs` for the operator and the integration of
/// the same control step.
#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub(crate) engine_id: u64,
    pub(crate) sequence: u64,
    pub(crate) buffers: StepBuffers,
}

impl PreparedStep {
    /// Time of the base point.
    pub fn time(&self) -> f64 {
        self.buffers.time
    }

    /// Time of the perturbed point, `t + h`.
    pub fn incremented_time(&self) -> f64 {
        self.buffers.incremented_time
    }

    /// Model state predicted at `t + h`.
    pub fn incremented_state(&self) -> &DVector<f64> {
        &self.buffers.incremented_state
    }

    /// Stationarity residual at the base point.
    pub fn residual(&self) -> &DVector<f64> {
        &self.buffers.residual
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Abandons the step without integrating, e.g. after a failed Krylov solve.
    pub fn discard(self) -> StepWorkspace {
        StepWorkspace {
            engine_id: self.engine_id,
            buffers: self.buffers,
        }
    }
}
