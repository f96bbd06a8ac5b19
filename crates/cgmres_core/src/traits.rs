use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// A finite-horizon optimal control problem discretized by multiple shooting.
///
/// The continuation engine treats the problem as a black box: it only needs
/// the dimensions, a one-step state prediction, the two optimality residuals,
/// and the inverse of the state/costate residual map.
///
/// Shapes used throughout:
/// - `state`: `dim_state()`
/// - `decision`: `stage_count() * (dim_control_input() + dim_constraints())`,
///   stage-major `(u_0, ρ_0, u_1, ρ_1, ...)`
/// - trajectories: `stage_count() × dim_state()`, one row per stage
///
/// Every method writes into a caller-provided buffer of the right shape.
pub trait OptimalControlProblem {
    /// Returns the dimension of the state space.
    fn dim_state(&self) -> usize;

    /// Returns the dimension of one stage's control input.
    fn dim_control_input(&self) -> usize;

    /// Returns the number of equality-constraint multipliers per stage.
    fn dim_constraints(&self) -> usize;

    /// Returns the number of horizon stages `N`.
    fn stage_count(&self) -> usize;

    /// Predicts the model state `dt` ahead of `state`, driven by the first
    /// stage of `decision`.
    fn predict_state(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        dt: f64,
        out: &mut DVector<f64>,
    );

    /// Evaluates the stationarity residual (derivative of the Hamiltonian
    /// with respect to the decision variables, plus constraint residuals).
    fn stationarity_residual(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
        out: &mut DVector<f64>,
    );

    /// Evaluates how far the shooting trajectories are from satisfying the
    /// state and costate equations.
    #[allow(clippy::too_many_arguments)]
    fn state_costate_residual(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
        state_residual: &mut DMatrix<f64>,
        costate_residual: &mut DMatrix<f64>,
    );

    /// Builds trajectories whose state/costate residuals equal the given
    /// targets. This is the inverse of [`state_costate_residual`].
    ///
    /// [`state_costate_residual`]: OptimalControlProblem::state_costate_residual
    #[allow(clippy::too_many_arguments)]
    fn reconstruct_trajectories(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_residual: &DMatrix<f64>,
        costate_residual: &DMatrix<f64>,
        state_traj: &mut DMatrix<f64>,
        costate_traj: &mut DMatrix<f64>,
    );

    /// Reconfigures the horizon: terminal length, growth rate, and time origin.
    fn reset_horizon(
        &mut self,
        final_length: f64,
        growth_rate: f64,
        initial_time: f64,
    ) -> Result<()>;

    /// Moves the horizon's time origin, keeping its length parameters.
    fn reset_horizon_origin(&mut self, initial_time: f64) -> Result<()>;
}
