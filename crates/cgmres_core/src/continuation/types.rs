//! Core types for the continuation engine.

use serde::{Deserialize, Serialize};

use crate::error::{ContinuationError, Result};
use crate::traits::OptimalControlProblem;

/// Settings controlling the finite-difference continuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContinuationSettings {
    /// Increment `h` used by every forward difference.
    pub finite_difference_increment: f64,
    /// Gain `ζ` at which the optimality residual is driven to zero.
    pub stabilization_gain: f64,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            finite_difference_increment: 1e-6,
            stabilization_gain: 1000.0,
        }
    }
}

impl ContinuationSettings {
    pub fn validate(&self) -> Result<()> {
        let h = self.finite_difference_increment;
        if !(h.is_finite() && h > 0.0) {
            return Err(ContinuationError::InvalidSettings(format!(
                "finite_difference_increment must be positive, got {h}"
            )));
        }
        let zeta = self.stabilization_gain;
        if !(zeta.is_finite() && zeta >= 0.0) {
            return Err(ContinuationError::InvalidSettings(format!(
                "stabilization_gain must be non-negative, got {zeta}"
            )));
        }
        Ok(())
    }
}

/// Problem dimensions, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub state: usize,
    pub control_input: usize,
    pub constraints: usize,
    pub stages: usize,
}

impl Dimensions {
    pub fn of<P: OptimalControlProblem>(problem: &P) -> Result<Self> {
        let dims = Self {
            state: problem.dim_state(),
            control_input: problem.dim_control_input(),
            constraints: problem.dim_constraints(),
            stages: problem.stage_count(),
        };
        if dims.state == 0 {
            return Err(ContinuationError::InvalidDimension {
                name: "dim_state",
                value: dims.state,
            });
        }
        if dims.stages == 0 {
            return Err(ContinuationError::InvalidDimension {
                name: "stage_count",
                value: dims.stages,
            });
        }
        if dims.stage_width() == 0 {
            return Err(ContinuationError::InvalidDimension {
                name: "dim_control_input + dim_constraints",
                value: 0,
            });
        }
        Ok(dims)
    }

    /// Decision variables per stage, `n_u + n_c`.
    pub fn stage_width(&self) -> usize {
        self.control_input + self.constraints
    }

    /// Length of the flattened decision sequence, `N·(n_u + n_c)`.
    pub fn decision(&self) -> usize {
        self.stages * self.stage_width()
    }
}
