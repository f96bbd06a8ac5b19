//! Multiple-shooting continuation engine.
//!
//! Tracks the root of the optimality residual `F(t, x, U) = 0` over time by
//! integrating the stabilized continuation equation
//!
//! ```text
//! (∂F/∂U) · dU/dt = -ζ F - ∂F/∂t
//! ```
//!
//! Every derivative is a forward difference with increment `h`, and the
//! shooting trajectories are never re-integrated: they are rebuilt from
//! prescribed state/costate residuals with one call to
//! [`OptimalControlProblem::reconstruct_trajectories`].

use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};

use super::step::{PreparedStep, StepWorkspace};
use super::types::{ContinuationSettings, Dimensions};
use crate::buffers::{
    check_trajectory, check_vector, new_trajectory, new_vector, offset_into, scaled_into,
    squared_norm,
};
use crate::error::{ContinuationError, Result};
use crate::horizon::HorizonSettings;
use crate::traits::OptimalControlProblem;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(0);

pub struct MultipleShootingContinuation<P: OptimalControlProblem> {
    problem: P,
    settings: ContinuationSettings,
    dims: Dimensions,
    id: u64,
    sequence: u64,
    incremented_decision: DVector<f64>,
    incremented_state_traj: DMatrix<f64>,
    incremented_costate_traj: DMatrix<f64>,
    scaled_state_residual: DMatrix<f64>,
    scaled_costate_residual: DMatrix<f64>,
    probe_residual: DVector<f64>,
    error_residual: DVector<f64>,
    error_state_residual: DMatrix<f64>,
    error_costate_residual: DMatrix<f64>,
}

impl<P: OptimalControlProblem> MultipleShootingContinuation<P> {
    pub fn new(problem: P, settings: ContinuationSettings) -> Result<Self> {
        settings.validate()?;
        let dims = Dimensions::of(&problem)?;
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "continuation engine {id}: n_x = {}, n_u = {}, n_c = {}, N = {}, h = {}, zeta = {}",
            dims.state,
            dims.control_input,
            dims.constraints,
            dims.stages,
            settings.finite_difference_increment,
            settings.stabilization_gain
        );
        Ok(Self {
            problem,
            settings,
            dims,
            id,
            sequence: 0,
            incremented_decision: new_vector(dims.decision()),
            incremented_state_traj: new_trajectory(dims.stages, dims.state),
            incremented_costate_traj: new_trajectory(dims.stages, dims.state),
            scaled_state_residual: new_trajectory(dims.stages, dims.state),
            scaled_costate_residual: new_trajectory(dims.stages, dims.state),
            probe_residual: new_vector(dims.decision()),
            error_residual: new_vector(dims.decision()),
            error_state_residual: new_trajectory(dims.stages, dims.state),
            error_costate_residual: new_trajectory(dims.stages, dims.state),
        })
    }

    /// Builds the engine and configures the problem's horizon in one go.
    pub fn with_horizon(
        problem: P,
        horizon: HorizonSettings,
        settings: ContinuationSettings,
    ) -> Result<Self> {
        let mut engine = Self::new(problem, settings)?;
        engine.reset_horizon(horizon.final_length, horizon.growth_rate, horizon.initial_time)?;
        Ok(engine)
    }

    pub fn dim_state(&self) -> usize {
        self.dims.state
    }

    pub fn dim_control_input(&self) -> usize {
        self.dims.control_input
    }

    pub fn dim_constraints(&self) -> usize {
        self.dims.constraints
    }

    /// Length of the condensed decision sequence, `N·(n_u + n_c)`.
    pub fn dim_decision(&self) -> usize {
        self.dims.decision()
    }

    pub fn stage_count(&self) -> usize {
        self.dims.stages
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn settings(&self) -> ContinuationSettings {
        self.settings
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Forwards a full horizon reconfiguration to the problem. Any step
    /// prepared before the reset becomes stale.
    pub fn reset_horizon(
        &mut self,
        final_length: f64,
        growth_rate: f64,
        initial_time: f64,
    ) -> Result<()> {
        self.problem.reset_horizon(final_length, growth_rate, initial_time)?;
        self.sequence += 1;
        debug!(
            "continuation engine {}: horizon reset (T_f = {final_length}, alpha = {growth_rate}, t0 = {initial_time})",
            self.id
        );
        self.check_dimensions_unchanged()
    }

    /// Moves the horizon's time origin. Any step prepared before the reset
    /// becomes stale.
    pub fn reset_horizon_origin(&mut self, initial_time: f64) -> Result<()> {
        self.problem.reset_horizon_origin(initial_time)?;
        self.sequence += 1;
        debug!(
            "continuation engine {}: horizon origin moved to t0 = {initial_time}",
            self.id
        );
        self.check_dimensions_unchanged()
    }

    /// Allocates the buffers for one in-flight control step. One workspace
    /// per control loop is enough.
    pub fn step_workspace(&self) -> StepWorkspace {
        StepWorkspace::new(self.id, &self.dims)
    }

    /// Euclidean norm of the full optimality residual (stationarity, state
    /// equation and costate equation) at the given point.
    ///
    /// Uses its own scratch buffers; a prepared step stays valid.
    pub fn compute_error_norm(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
    ) -> Result<f64> {
        self.check_point(state, decision, state_traj, costate_traj)?;
        self.problem.stationarity_residual(
            time,
            state,
            decision,
            state_traj,
            costate_traj,
            &mut self.error_residual,
        );
        self.problem.state_costate_residual(
            time,
            state,
            decision,
            state_traj,
            costate_traj,
            &mut self.error_state_residual,
            &mut self.error_costate_residual,
        );
        let squared = squared_norm(self.error_residual.as_slice())
            + squared_norm(self.error_state_residual.as_slice())
            + squared_norm(self.error_costate_residual.as_slice());
        let norm = squared.sqrt();
        if !norm.is_finite() {
            warn!(
                "continuation engine {}: optimality residual is not finite at t = {time}",
                self.id
            );
        }
        Ok(norm)
    }

    /// Builds the right-hand side `b` of the continuation equation at the
    /// current sample and caches the residuals the rest of the step reuses.
    ///
    /// `b = -ζ F - dF/dt - A·prior_direction`, so the Krylov solve of
    /// `A·δ = b` yields a correction and the direction to integrate is
    /// `prior_direction + δ`. `prior_direction` is the direction accepted at
    /// the previous sample (zero on the first one).
    #[allow(clippy::too_many_arguments)]
    pub fn build_rhs(
        &mut self,
        workspace: StepWorkspace,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
        prior_direction: &DVector<f64>,
        b: &mut DVector<f64>,
    ) -> Result<PreparedStep> {
        if workspace.engine_id != self.id {
            return Err(ContinuationError::ForeignStep);
        }
        self.check_point(state, decision, state_traj, costate_traj)?;
        check_vector("prior direction", prior_direction, self.dims.decision())?;
        check_vector("right-hand side", b, self.dims.decision())?;

        let h = self.settings.finite_difference_increment;
        let zeta = self.settings.stabilization_gain;
        let mut buf = workspace.buffers;

        buf.time = time;
        buf.incremented_time = time + h;
        let t_h = buf.incremented_time;
        self.problem.predict_state(time, state, decision, h, &mut buf.incremented_state);

        // Base residuals, and the explicit time/state shift along fixed trajectories.
        self.problem.stationarity_residual(
            time,
            state,
            decision,
            state_traj,
            costate_traj,
            &mut buf.residual,
        );
        self.problem.stationarity_residual(
            t_h,
            &buf.incremented_state,
            decision,
            state_traj,
            costate_traj,
            &mut buf.incremented_residual,
        );
        self.problem.state_costate_residual(
            time,
            state,
            decision,
            state_traj,
            costate_traj,
            &mut buf.state_residual,
            &mut buf.costate_residual,
        );

        // Trajectories at t + h whose residuals decayed by (1 - hζ).
        scaled_into(&mut self.scaled_state_residual, &buf.state_residual, 1.0 - h * zeta);
        scaled_into(&mut self.scaled_costate_residual, &buf.costate_residual, 1.0 - h * zeta);
        self.problem.reconstruct_trajectories(
            t_h,
            &buf.incremented_state,
            decision,
            &self.scaled_state_residual,
            &self.scaled_costate_residual,
            &mut self.incremented_state_traj,
            &mut self.incremented_costate_traj,
        );
        self.problem.stationarity_residual(
            t_h,
            &buf.incremented_state,
            decision,
            &self.incremented_state_traj,
            &self.incremented_costate_traj,
            &mut self.probe_residual,
        );

        // b = (F - F_shifted) / h - ζ F
        b.copy_from(&buf.residual);
        b.axpy(-1.0, &self.probe_residual, 1.0);
        b.scale_mut(1.0 / h);
        b.axpy(-zeta, &buf.residual, 1.0);

        // Cross term: the prior direction applied at the shifted point.
        self.problem.state_costate_residual(
            t_h,
            &buf.incremented_state,
            decision,
            state_traj,
            costate_traj,
            &mut buf.incremented_state_residual,
            &mut buf.incremented_costate_residual,
        );
        offset_into(&mut self.incremented_decision, decision, h, prior_direction);
        self.problem.reconstruct_trajectories(
            t_h,
            &buf.incremented_state,
            &self.incremented_decision,
            &buf.incremented_state_residual,
            &buf.incremented_costate_residual,
            &mut self.incremented_state_traj,
            &mut self.incremented_costate_traj,
        );
        self.problem.stationarity_residual(
            t_h,
            &buf.incremented_state,
            &self.incremented_decision,
            &self.incremented_state_traj,
            &self.incremented_costate_traj,
            &mut self.probe_residual,
        );
        self.probe_residual.axpy(-1.0, &buf.incremented_residual, 1.0);
        b.axpy(-1.0 / h, &self.probe_residual, 1.0);

        self.sequence += 1;
        trace!(
            "continuation engine {}: prepared step {} at t = {time}",
            self.id,
            self.sequence
        );
        Ok(PreparedStep {
            engine_id: self.id,
            sequence: self.sequence,
            buffers: buf,
        })
    }

    /// Matrix-free product of the condensed Jacobian `∂F/∂U` with
    /// `direction`, evaluated at the point `step` was prepared for.
    pub fn apply_operator(
        &mut self,
        step: &PreparedStep,
        decision: &DVector<f64>,
        direction: &DVector<f64>,
        out: &mut DVector<f64>,
    ) -> Result<()> {
        self.check_step(step)?;
        check_vector("decision sequence", decision, self.dims.decision())?;
        check_vector("direction", direction, self.dims.decision())?;
        check_vector("operator output", out, self.dims.decision())?;

        let h = self.settings.finite_difference_increment;
        let buf = &step.buffers;
        offset_into(&mut self.incremented_decision, decision, h, direction);
        self.problem.reconstruct_trajectories(
            buf.incremented_time,
            &buf.incremented_state,
            &self.incremented_decision,
            &buf.incremented_state_residual,
            &buf.incremented_costate_residual,
            &mut self.incremented_state_traj,
            &mut self.incremented_costate_traj,
        );
        self.problem.stationarity_residual(
            buf.incremented_time,
            &buf.incremented_state,
            &self.incremented_decision,
            &self.incremented_state_traj,
            &self.incremented_costate_traj,
            out,
        );
        out.axpy(-1.0, &buf.incremented_residual, 1.0);
        out.scale_mut(1.0 / h);
        Ok(())
    }

    /// Advances the decision sequence and the shooting trajectories by one
    /// sample of length `step_length` along `direction`, and returns the step
    /// buffers for the next sample.
    ///
    /// On error the step is dropped; allocate a fresh one with
    /// [`step_workspace`](Self::step_workspace).
    pub fn integrate(
        &mut self,
        step: PreparedStep,
        decision: &mut DVector<f64>,
        state_traj: &mut DMatrix<f64>,
        costate_traj: &mut DMatrix<f64>,
        direction: &DVector<f64>,
        step_length: f64,
    ) -> Result<StepWorkspace> {
        self.check_step(&step)?;
        let dims = self.dims;
        check_vector("decision sequence", decision, dims.decision())?;
        check_vector("direction", direction, dims.decision())?;
        check_trajectory("state trajectory", state_traj, dims.stages, dims.state)?;
        check_trajectory("costate trajectory", costate_traj, dims.stages, dims.state)?;

        let h = self.settings.finite_difference_increment;
        let zeta = self.settings.stabilization_gain;
        let buf = &step.buffers;
        offset_into(&mut self.incremented_decision, decision, h, direction);
        scaled_into(&mut self.scaled_state_residual, &buf.state_residual, 1.0 - h * zeta);
        scaled_into(&mut self.scaled_costate_residual, &buf.costate_residual, 1.0 - h * zeta);
        self.problem.reconstruct_trajectories(
            buf.incremented_time,
            &buf.incremented_state,
            &self.incremented_decision,
            &self.scaled_state_residual,
            &self.scaled_costate_residual,
            &mut self.incremented_state_traj,
            &mut self.incremented_costate_traj,
        );

        // X += (τ/h)(X'' - X), same for Λ.
        let ratio = step_length / h;
        state_traj.zip_apply(&self.incremented_state_traj, |x, shifted| {
            *x += ratio * (shifted - *x)
        });
        costate_traj.zip_apply(&self.incremented_costate_traj, |lmd, shifted| {
            *lmd += ratio * (shifted - *lmd)
        });
        decision.axpy(step_length, direction, 1.0);

        Ok(step.discard())
    }

    fn check_point(
        &self,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
    ) -> Result<()> {
        let dims = &self.dims;
        check_vector("state", state, dims.state)?;
        check_vector("decision sequence", decision, dims.decision())?;
        check_trajectory("state trajectory", state_traj, dims.stages, dims.state)?;
        check_trajectory("costate trajectory", costate_traj, dims.stages, dims.state)
    }

    fn check_step(&self, step: &PreparedStep) -> Result<()> {
        if step.engine_id != self.id {
            return Err(ContinuationError::ForeignStep);
        }
        if step.sequence != self.sequence {
            return Err(ContinuationError::StaleStep {
                prepared: step.sequence,
                current: self.sequence,
            });
        }
        Ok(())
    }

    fn check_dimensions_unchanged(&self) -> Result<()> {
        let dims = Dimensions::of(&self.problem)?;
        if dims != self.dims {
            return Err(ContinuationError::DimensionMismatch {
                what: "decision sequence after horizon reset",
                expected: self.dims.decision(),
                actual: dims.decision(),
            });
        }
        Ok(())
    }
}
