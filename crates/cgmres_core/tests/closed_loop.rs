use cgmres_core::{
    ContinuationError, ContinuationSettings, HorizonSettings, InputConstraint,
    LinearQuadraticOcp, MultipleShootingContinuation, OptimalControlProblem, PreparedStep,
};
use nalgebra::{DMatrix, DVector};

const SAMPLING_PERIOD: f64 = 1e-3;

fn double_integrator(stages: usize, horizon: HorizonSettings) -> LinearQuadraticOcp {
    LinearQuadraticOcp::new(
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
        DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
        DMatrix::identity(2, 2),
        DMatrix::from_element(1, 1, 1.0),
        DMatrix::identity(2, 2),
        stages,
        horizon,
    )
    .expect("double integrator should build")
}

fn constrained_problem() -> LinearQuadraticOcp {
    let a = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -2.0, -0.3]);
    let b = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.5, 1.0]);
    let r = DMatrix::from_row_slice(2, 2, &[2.0, 0.1, 0.1, 1.0]);
    LinearQuadraticOcp::new(
        a,
        b,
        DMatrix::identity(2, 2),
        r,
        DMatrix::identity(2, 2) * 3.0,
        4,
        HorizonSettings {
            final_length: 0.8,
            growth_rate: 0.0,
            initial_time: 0.0,
        },
    )
    .unwrap()
    .with_input_constraint(InputConstraint {
        matrix: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
        target: DVector::from_vec(vec![0.2]),
    })
    .unwrap()
}

/// Dense stand-in for the Krylov solver: assembles the operator column by
/// column and solves `A·δ = b` by LU.
fn solve_correction<P: OptimalControlProblem>(
    engine: &mut MultipleShootingContinuation<P>,
    step: &PreparedStep,
    decision: &DVector<f64>,
    b: &DVector<f64>,
) -> DVector<f64> {
    let n = engine.dim_decision();
    let mut jacobian = DMatrix::zeros(n, n);
    let mut unit = DVector::zeros(n);
    let mut column = DVector::zeros(n);
    for j in 0..n {
        unit.fill(0.0);
        unit[j] = 1.0;
        engine
            .apply_operator(step, decision, &unit, &mut column)
            .unwrap();
        jacobian.set_column(j, &column);
    }
    jacobian
        .lu()
        .solve(b)
        .expect("condensed Jacobian should be nonsingular")
}

fn sample_vector(n: usize, seed: f64) -> DVector<f64> {
    DVector::from_fn(n, |i, _| ((i as f64 + 1.0) * seed).sin())
}

#[test]
fn error_norm_vanishes_at_zero_horizon_optimum() {
    let mut ocp = double_integrator(
        6,
        HorizonSettings {
            final_length: 1.0,
            growth_rate: 5.0,
            initial_time: 0.0,
        },
    );
    let state = DVector::from_vec(vec![0.4, -1.3]);
    let decision = ocp.initial_decision(&state).unwrap();
    let (state_traj, costate_traj) = ocp.consistent_trajectories(0.0, &state, &decision);

    let mut engine = MultipleShootingContinuation::new(ocp, ContinuationSettings::default()).unwrap();
    let norm = engine
        .compute_error_norm(0.0, &state, &decision, &state_traj, &costate_traj)
        .unwrap();
    assert!(norm < 1e-12, "error norm = {norm}");
}

#[test]
fn error_norm_of_consistent_trajectories_is_stationarity_norm() {
    let mut ocp = constrained_problem();
    let state = DVector::from_vec(vec![1.0, 0.5]);
    let decision = sample_vector(12, 0.7);
    let (state_traj, costate_traj) = ocp.consistent_trajectories(0.3, &state, &decision);

    let mut stationarity = DVector::zeros(12);
    ocp.stationarity_residual(0.3, &state, &decision, &state_traj, &costate_traj, &mut stationarity);

    let mut engine = MultipleShootingContinuation::new(ocp, ContinuationSettings::default()).unwrap();
    let norm = engine
        .compute_error_norm(0.3, &state, &decision, &state_traj, &costate_traj)
        .unwrap();
    assert!((norm - stationarity.norm()).abs() < 1e-12);
}

#[test]
fn operator_is_linear_in_direction() {
    let mut ocp = constrained_problem();
    let state = DVector::from_vec(vec![0.2, -0.1]);
    let decision = sample_vector(12, 0.3);
    let (mut state_traj, costate_traj) = ocp.consistent_trajectories(0.0, &state, &decision);
    state_traj[(1, 0)] += 0.05;

    let mut engine = MultipleShootingContinuation::new(ocp, ContinuationSettings::default()).unwrap();
    assert_eq!(engine.dim_constraints(), 1);
    assert_eq!(engine.dim_decision(), 12);

    let mut workspace = engine.step_workspace();
    let mut b = DVector::zeros(12);
    let step = engine
        .build_rhs(
            workspace,
            0.0,
            &state,
            &decision,
            &state_traj,
            &costate_traj,
            &DVector::zeros(12),
            &mut b,
        )
        .unwrap();

    let d1 = sample_vector(12, 1.1);
    let d2 = sample_vector(12, 2.3);
    let s = -0.75;
    let mut a1 = DVector::zeros(12);
    let mut a2 = DVector::zeros(12);
    let mut combined = DVector::zeros(12);
    engine.apply_operator(&step, &decision, &d1, &mut a1).unwrap();
    engine.apply_operator(&step, &decision, &d2, &mut a2).unwrap();
    engine
        .apply_operator(&step, &decision, &(&d1 + &d2 * s), &mut combined)
        .unwrap();
    let expected = &a1 + &a2 * s;
    assert!(
        (&combined - &expected).amax() < 1e-5 * (1.0 + expected.amax()),
        "linearity violated: {}",
        (&combined - &expected).amax()
    );

    let mut zero = DVector::zeros(12);
    engine
        .apply_operator(&step, &decision, &DVector::zeros(12), &mut zero)
        .unwrap();
    assert!(zero.amax() < 1e-8);

    workspace = step.discard();
    assert!(engine
        .build_rhs(
            workspace,
            0.0,
            &state,
            &decision,
            &state_traj,
            &costate_traj,
            &DVector::zeros(12),
            &mut b,
        )
        .is_ok());
}

#[test]
fn zero_direction_only_decays_trajectory_residuals() {
    let mut ocp = constrained_problem();
    let state = DVector::from_vec(vec![-0.3, 0.9]);
    let decision = sample_vector(12, 0.5);
    let (mut state_traj, mut costate_traj) = ocp.consistent_trajectories(0.0, &state, &decision);
    state_traj.add_scalar_mut(0.01);
    costate_traj[(2, 1)] -= 0.02;

    let mut residual_x = DMatrix::zeros(4, 2);
    let mut residual_l = DMatrix::zeros(4, 2);
    let mut reference = ocp.clone();
    reference.state_costate_residual(
        0.0,
        &state,
        &decision,
        &state_traj,
        &costate_traj,
        &mut residual_x,
        &mut residual_l,
    );

    let settings = ContinuationSettings::default();
    let h = settings.finite_difference_increment;
    let mut engine = MultipleShootingContinuation::new(ocp, settings).unwrap();
    let mut b = DVector::zeros(12);
    let step = engine
        .build_rhs(
            engine.step_workspace(),
            0.0,
            &state,
            &decision,
            &state_traj,
            &costate_traj,
            &DVector::zeros(12),
            &mut b,
        )
        .unwrap();
    let shifted_time = step.incremented_time();
    let shifted_state = step.incremented_state().clone();

    let mut next_decision = decision.clone();
    engine
        .integrate(
            step,
            &mut next_decision,
            &mut state_traj,
            &mut costate_traj,
            &DVector::zeros(12),
            h,
        )
        .unwrap();
    assert_eq!(next_decision, decision);

    let mut after_x = DMatrix::zeros(4, 2);
    let mut after_l = DMatrix::zeros(4, 2);
    reference.state_costate_residual(
        shifted_time,
        &shifted_state,
        &next_decision,
        &state_traj,
        &costate_traj,
        &mut after_x,
        &mut after_l,
    );
    let kappa = 1.0 - h * settings.stabilization_gain;
    assert!((after_x - residual_x * kappa).amax() < 1e-9);
    assert!((after_l - residual_l * kappa).amax() < 1e-9);
}

#[test]
fn closed_loop_tracks_optimality_while_horizon_grows() {
    let horizon = HorizonSettings {
        final_length: 1.0,
        growth_rate: 10.0,
        initial_time: 0.0,
    };
    let mut ocp = double_integrator(10, horizon);
    let mut state = DVector::from_vec(vec![1.0, 0.0]);
    let mut decision = ocp.initial_decision(&state).unwrap();
    let (mut state_traj, mut costate_traj) = ocp.consistent_trajectories(0.0, &state, &decision);
    let (a, b_mat) = (
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
        DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
    );

    let settings = ContinuationSettings {
        finite_difference_increment: 1e-6,
        stabilization_gain: 1.0 / SAMPLING_PERIOD,
    };
    let mut engine = MultipleShootingContinuation::with_horizon(ocp, horizon, settings).unwrap();
    let n = engine.dim_decision();
    let mut workspace = engine.step_workspace();
    let mut direction = DVector::zeros(n);
    let mut b = DVector::zeros(n);
    let mut time = 0.0;
    let mut worst_error: f64 = 0.0;

    for _ in 0..1000 {
        let step = engine
            .build_rhs(
                workspace,
                time,
                &state,
                &decision,
                &state_traj,
                &costate_traj,
                &direction,
                &mut b,
            )
            .unwrap();
        direction += solve_correction(&mut engine, &step, &decision, &b);

        let input = decision.rows(0, 1).clone_owned();
        workspace = engine
            .integrate(
                step,
                &mut decision,
                &mut state_traj,
                &mut costate_traj,
                &direction,
                SAMPLING_PERIOD,
            )
            .unwrap();

        state = &state + (&a * &state + &b_mat * &input) * SAMPLING_PERIOD;
        time += SAMPLING_PERIOD;
        let error = engine
            .compute_error_norm(time, &state, &decision, &state_traj, &costate_traj)
            .unwrap();
        worst_error = worst_error.max(error);
    }

    assert!(worst_error < 1e-2, "worst error norm = {worst_error}");
    assert!(state.iter().all(|v| v.is_finite()));
    assert!(state[0] < 1.0, "position did not move towards the origin");
}

#[test]
fn mismatched_decision_sequence_is_rejected() {
    let ocp = constrained_problem();
    let mut engine = MultipleShootingContinuation::new(ocp, ContinuationSettings::default()).unwrap();
    let state = DVector::zeros(2);
    let trajectory = DMatrix::zeros(4, 2);
    let err = engine
        .compute_error_norm(0.0, &state, &DVector::zeros(11), &trajectory, &trajectory)
        .unwrap_err();
    assert!(matches!(
        err,
        ContinuationError::DimensionMismatch {
            expected: 12,
            actual: 11,
            ..
        }
    ));
    assert_eq!(
        err.to_string(),
        "decision sequence dimension mismatch: expected 12, got 11"
    );
}
