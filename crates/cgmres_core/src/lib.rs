//! The `cgmres_core` crate is the numerical core of a Continuation/GMRES
//! nonlinear model predictive controller.
//!
//! Instead of re-solving the optimality conditions at every sample, the
//! engine tracks their time-varying root: each control step builds one
//! linear equation, exposes its matrix-free operator to an external Krylov
//! solver, and integrates the returned direction forward.
//!
//! Key components:
//! - **Traits**: `OptimalControlProblem`, the multiple-shooting problem contract.
//! - **Continuation**: `MultipleShootingContinuation` (right-hand side, operator,
//!   integration, error norm) and the `StepWorkspace`/`PreparedStep` step context.
//! - **Horizon**: the smoothly growing prediction horizon.
//! - **Linear quadratic**: a reference problem implementing the trait.

pub mod buffers;
pub mod continuation;
pub mod error;
pub mod horizon;
pub mod linear_quadratic;
pub mod traits;

pub use continuation::{
    ContinuationSettings, Dimensions, MultipleShootingContinuation, PreparedStep, StepWorkspace,
};
pub use error::{ContinuationError, Result};
pub use horizon::{Horizon, HorizonSettings};
pub use linear_quadratic::{InputConstraint, LinearQuadraticOcp};
pub use traits::OptimalControlProblem;
