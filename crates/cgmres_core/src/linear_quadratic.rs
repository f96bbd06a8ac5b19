//! Reference multiple-shooting problem: linear dynamics, quadratic cost.
//!
//! ```text
//! dx/dt = A x + B u
//! J     = ½ x(T)ᵀ S x(T) + ∫ ½ xᵀ Q x + ½ uᵀ R u dt
//! s.t.    E u = e        (optional, multipliers ρ)
//! ```
//!
//! The horizon is split into `N` stages of length `Δτ = T(t)/N`. Stage `i`
//! starts at `x_i` (`x_0` is the measured state, `x_i = X[i-1]` otherwise)
//! and carries the costate `λ_{i+1} = Λ[i]`.

use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};

use crate::buffers::{new_trajectory, new_vector};
use crate::horizon::{Horizon, HorizonSettings};
use crate::traits::OptimalControlProblem;

/// Linear equality constraint `E u = e` imposed on every stage input.
#[derive(Debug, Clone)]
pub struct InputConstraint {
    pub matrix: DMatrix<f64>,
    pub target: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct LinearQuadraticOcp {
    a: DMatrix<f64>,
    b: DMatrix<f64>,
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    s: DMatrix<f64>,
    constraint: Option<InputConstraint>,
    horizon: Horizon,
    stages: usize,
    flow: DVector<f64>,
    stage_state: DVector<f64>,
    next_state: DVector<f64>,
    stage_costate: DVector<f64>,
    next_costate: DVector<f64>,
}

impl LinearQuadraticOcp {
    pub fn new(
        a: DMatrix<f64>,
        b: DMatrix<f64>,
        q: DMatrix<f64>,
        r: DMatrix<f64>,
        s: DMatrix<f64>,
        stages: usize,
        horizon: HorizonSettings,
    ) -> Result<Self> {
        let nx = a.nrows();
        let nu = b.ncols();
        if nx == 0 || a.ncols() != nx {
            bail!("A must be square and non-empty, got {:?}.", a.shape());
        }
        if b.nrows() != nx {
            bail!("B must have {} rows, got {}.", nx, b.nrows());
        }
        if q.shape() != (nx, nx) || s.shape() != (nx, nx) {
            bail!("Q and S must be {}x{}.", nx, nx);
        }
        if r.shape() != (nu, nu) {
            bail!("R must be {}x{}, got {:?}.", nu, nu, r.shape());
        }
        if stages == 0 {
            bail!("stages must be greater than zero.");
        }
        Ok(Self {
            a,
            b,
            q,
            r,
            s,
            constraint: None,
            horizon: Horizon::new(horizon)?,
            stages,
            flow: new_vector(nx),
            stage_state: new_vector(nx),
            next_state: new_vector(nx),
            stage_costate: new_vector(nx),
            next_costate: new_vector(nx),
        })
    }

    pub fn with_input_constraint(mut self, constraint: InputConstraint) -> Result<Self> {
        let nu = self.b.ncols();
        if constraint.matrix.ncols() != nu {
            bail!(
                "constraint matrix must have {} columns, got {}.",
                nu,
                constraint.matrix.ncols()
            );
        }
        if constraint.target.len() != constraint.matrix.nrows() {
            bail!(
                "constraint target must have {} entries, got {}.",
                constraint.matrix.nrows(),
                constraint.target.len()
            );
        }
        self.constraint = Some(constraint);
        Ok(self)
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// Length of one shooting stage at `time`.
    pub fn stage_length(&self, time: f64) -> f64 {
        self.horizon.length(time) / self.stages as f64
    }

    /// Optimal decision sequence for a zero-length horizon, where every stage
    /// solves `[R Eᵀ; E 0] [u; ρ] = [-Bᵀ S x; e]`.
    pub fn initial_decision(&self, state: &DVector<f64>) -> Result<DVector<f64>> {
        if state.len() != self.dim_state() {
            bail!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                self.dim_state(),
                state.len()
            );
        }
        let nu = self.dim_control_input();
        let nc = self.dim_constraints();
        let width = nu + nc;

        let mut kkt = DMatrix::<f64>::zeros(width, width);
        kkt.view_mut((0, 0), (nu, nu)).copy_from(&self.r);
        let mut rhs = DVector::<f64>::zeros(width);
        let terminal_costate = &self.s * state;
        rhs.rows_mut(0, nu).gemv_tr(-1.0, &self.b, &terminal_costate, 0.0);
        if let Some(c) = &self.constraint {
            kkt.view_mut((0, nu), (nu, nc)).copy_from(&c.matrix.transpose());
            kkt.view_mut((nu, 0), (nc, nu)).copy_from(&c.matrix);
            rhs.rows_mut(nu, nc).copy_from(&c.target);
        }
        let stage = kkt
            .lu()
            .solve(&rhs)
            .ok_or_else(|| anyhow!("Stage KKT matrix is singular."))?;

        let mut decision = DVector::zeros(self.stages * width);
        for i in 0..self.stages {
            decision.rows_mut(i * width, width).copy_from(&stage);
        }
        Ok(decision)
    }

    /// Trajectories that satisfy the state and costate equations exactly.
    pub fn consistent_trajectories(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let zero = new_trajectory(self.stages, self.dim_state());
        let mut state_traj = zero.clone();
        let mut costate_traj = zero.clone();
        self.reconstruct_trajectories(
            time,
            state,
            decision,
            &zero,
            &zero,
            &mut state_traj,
            &mut costate_traj,
        );
        (state_traj, costate_traj)
    }

    /// `flow = A x + B u_i` for the stage starting at `stage_state`.
    fn stage_flow(&mut self, decision: &DVector<f64>, stage: usize) {
        let nu = self.dim_control_input();
        let width = nu + self.dim_constraints();
        let input = decision.rows(stage * width, nu);
        self.flow.gemv(1.0, &self.a, &self.stage_state, 0.0);
        self.flow.gemv(1.0, &self.b, &input, 1.0);
    }

    /// `flow = Q X[i] + Aᵀ Λ[i+1]` with `next_state = X[i]`, `next_costate = Λ[i+1]`.
    fn costate_flow(&mut self) {
        self.flow.gemv(1.0, &self.q, &self.next_state, 0.0);
        self.flow.gemv_tr(1.0, &self.a, &self.next_costate, 1.0);
    }
}

fn load_row(dst: &mut DVector<f64>, src: &DMatrix<f64>, row: usize) {
    for (d, &v) in dst.iter_mut().zip(src.row(row).iter()) {
        *d = v;
    }
}

fn store_row(dst: &mut DMatrix<f64>, row: usize, src: &DVector<f64>) {
    for (d, &v) in dst.row_mut(row).iter_mut().zip(src.iter()) {
        *d = v;
    }
}

impl OptimalControlProblem for LinearQuadraticOcp {
    fn dim_state(&self) -> usize {
        self.a.nrows()
    }

    fn dim_control_input(&self) -> usize {
        self.b.ncols()
    }

    fn dim_constraints(&self) -> usize {
        self.constraint.as_ref().map_or(0, |c| c.matrix.nrows())
    }

    fn stage_count(&self) -> usize {
        self.stages
    }

    fn predict_state(
        &mut self,
        _time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        dt: f64,
        out: &mut DVector<f64>,
    ) {
        self.stage_state.copy_from(state);
        self.stage_flow(decision, 0);
        out.copy_from(state);
        out.axpy(dt, &self.flow, 1.0);
    }

    fn stationarity_residual(
        &mut self,
        _time: f64,
        _state: &DVector<f64>,
        decision: &DVector<f64>,
        _state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
        out: &mut DVector<f64>,
    ) {
        let nu = self.dim_control_input();
        let nc = self.dim_constraints();
        let width = nu + nc;
        for i in 0..self.stages {
            load_row(&mut self.stage_costate, costate_traj, i);
            let input = decision.rows(i * width, nu);
            let mut hu = out.rows_mut(i * width, nu);
            hu.gemv(1.0, &self.r, &input, 0.0);
            hu.gemv_tr(1.0, &self.b, &self.stage_costate, 1.0);
            if let Some(c) = &self.constraint {
                let multiplier = decision.rows(i * width + nu, nc);
                hu.gemv_tr(1.0, &c.matrix, &multiplier, 1.0);
                let mut violation = out.rows_mut(i * width + nu, nc);
                violation.copy_from(&c.target);
                violation.gemv(1.0, &c.matrix, &input, -1.0);
            }
        }
    }

    fn state_costate_residual(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_traj: &DMatrix<f64>,
        costate_traj: &DMatrix<f64>,
        state_residual: &mut DMatrix<f64>,
        costate_residual: &mut DMatrix<f64>,
    ) {
        let dtau = self.stage_length(time);
        let last = self.stages - 1;

        self.stage_state.copy_from(state);
        for i in 0..self.stages {
            self.stage_flow(decision, i);
            load_row(&mut self.next_state, state_traj, i);
            // X[i] - x_i - Δτ f(x_i, u_i)
            self.next_state.axpy(-1.0, &self.stage_state, 1.0);
            self.next_state.axpy(-dtau, &self.flow, 1.0);
            store_row(state_residual, i, &self.next_state);
            load_row(&mut self.stage_state, state_traj, i);
        }

        load_row(&mut self.next_state, state_traj, last);
        load_row(&mut self.stage_costate, costate_traj, last);
        self.stage_costate.gemv(-1.0, &self.s, &self.next_state, 1.0);
        store_row(costate_residual, last, &self.stage_costate);
        for i in (0..last).rev() {
            load_row(&mut self.next_state, state_traj, i);
            load_row(&mut self.next_costate, costate_traj, i + 1);
            self.costate_flow();
            // Λ[i] - Λ[i+1] - Δτ (Q X[i] + Aᵀ Λ[i+1])
            load_row(&mut self.stage_costate, costate_traj, i);
            self.stage_costate.axpy(-1.0, &self.next_costate, 1.0);
            self.stage_costate.axpy(-dtau, &self.flow, 1.0);
            store_row(costate_residual, i, &self.stage_costate);
        }
    }

    fn reconstruct_trajectories(
        &mut self,
        time: f64,
        state: &DVector<f64>,
        decision: &DVector<f64>,
        state_residual: &DMatrix<f64>,
        costate_residual: &DMatrix<f64>,
        state_traj: &mut DMatrix<f64>,
        costate_traj: &mut DMatrix<f64>,
    ) {
        let dtau = self.stage_length(time);
        let last = self.stages - 1;

        self.stage_state.copy_from(state);
        for i in 0..self.stages {
            self.stage_flow(decision, i);
            load_row(&mut self.next_state, state_residual, i);
            self.next_state.axpy(1.0, &self.stage_state, 1.0);
            self.next_state.axpy(dtau, &self.flow, 1.0);
            store_row(state_traj, i, &self.next_state);
            std::mem::swap(&mut self.stage_state, &mut self.next_state);
        }

        // stage_state now holds X[N-1].
        load_row(&mut self.next_costate, costate_residual, last);
        self.next_costate.gemv(1.0, &self.s, &self.stage_state, 1.0);
        store_row(costate_traj, last, &self.next_costate);
        for i in (0..last).rev() {
            load_row(&mut self.next_state, state_traj, i);
            self.costate_flow();
            load_row(&mut self.stage_costate, costate_residual, i);
            self.stage_costate.axpy(1.0, &self.next_costate, 1.0);
            self.stage_costate.axpy(dtau, &self.flow, 1.0);
            store_row(costate_traj, i, &self.stage_costate);
            std::mem::swap(&mut self.next_costate, &mut self.stage_costate);
        }
    }

    fn reset_horizon(
        &mut self,
        final_length: f64,
        growth_rate: f64,
        initial_time: f64,
    ) -> Result<()> {
        self.horizon.reset(final_length, growth_rate, initial_time)
    }

    fn reset_horizon_origin(&mut self, initial_time: f64) -> Result<()> {
        self.horizon.reset_origin(initial_time)
    }
}
