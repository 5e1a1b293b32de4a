//! Integration tests for the nullspace-projection solver.
//!
//! Every test builds a stack from generic tasks and constraints, runs one
//! `update()` and checks the solution against a closed-form answer.

use hqp_core::{
    constraint, task, AutoStack, BackEndKind, GenericConstraint, GenericTask, HqpConfig, HqpError, LevelSetting,
    NullspaceHqp, Task,
};
use nalgebra::{DMatrix, DVector};

// ─── helpers ─────────────────────────────────────────────────────────────────

fn generic(id: &str, a: DMatrix<f64>, b: DVector<f64>) -> task::TaskPtr {
    task::shared(GenericTask::new(id, a, b).unwrap())
}

fn assert_close(actual: &DVector<f64>, expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < tol,
            "x[{}] = {:.9} (expected {:.9} ± {:.0e})",
            i,
            a,
            e,
            tol
        );
    }
}

fn solve(stack: &mut AutoStack, config: HqpConfig) -> (NullspaceHqp, DVector<f64>) {
    stack.update(&DVector::zeros(stack.x_size())).unwrap();
    let mut solver = NullspaceHqp::new(stack, config).unwrap();
    let x = solver.solve().unwrap();
    (solver, x)
}

// ─── test 1 ───────────────────────────────────────────────────────────────────
//
// ‖x − 2‖² with −1 ≤ Σx ≤ 0.3: the sum constraint is active and the
// optimum spreads it evenly.

#[test]
fn test_sum_constraint_spreads_evenly() {
    let n = 5;
    let level = generic("target", DMatrix::identity(n, n), DVector::from_element(n, 2.0));
    let sum = constraint::shared(
        GenericConstraint::inequality(
            "sum",
            DMatrix::from_element(1, n, 1.0),
            DVector::from_element(1, -1.0),
            DVector::from_element(1, 0.3),
        )
        .unwrap(),
    );
    let mut stack = AutoStack::new(level).unwrap().with_bound(sum).unwrap();

    for config in [HqpConfig::default(), HqpConfig::unregularized()] {
        let (_, x) = solve(&mut stack, config);
        assert_close(&x, &[0.06; 5], 1e-6);
    }
}

// ─── test 2 ───────────────────────────────────────────────────────────────────
//
// Level 0 pins x₀ = 1; level 1 pulls everything to zero.  The lower level
// must not move x₀.

#[test]
fn test_higher_level_is_not_disturbed() {
    let pin = generic("pin", DMatrix::from_row_slice(1, 3, &[1.0, 0.0, 0.0]), DVector::from_element(1, 1.0));
    let rest = generic("rest", DMatrix::identity(3, 3), DVector::zeros(3));
    let mut stack = AutoStack::new(pin).unwrap().then(rest).unwrap();

    let (solver, x) = solve(&mut stack, HqpConfig::default());
    assert_close(&x, &[1.0, 0.0, 0.0], 1e-6);

    let reports = solver.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].task_id, "pin");
    assert_eq!(reports[0].nullspace_dimension, 2);
    assert_eq!(reports[0].rank(), 1);
    assert_eq!(reports[1].variables, 2);
    assert_eq!(reports[1].nullspace_dimension, 0);
}

// ─── test 3 ───────────────────────────────────────────────────────────────────
//
// One full-rank level without regularization is ordinary least squares.

#[test]
fn test_single_unregularized_level_is_least_squares() {
    let a = DMatrix::from_row_slice(4, 3, &[1.0, 2.0, 0.0, 0.0, 1.0, 1.0, 3.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    let b = DVector::from_vec(vec![1.0, -2.0, 0.5, 4.0]);
    let expected = (a.transpose() * &a).try_inverse().unwrap() * a.transpose() * &b;

    let mut stack = AutoStack::new(generic("ls", a, b)).unwrap();
    let (_, x) = solve(&mut stack, HqpConfig::unregularized());
    assert_close(&x, expected.as_slice(), 1e-6);
}

// ─── test 4 ───────────────────────────────────────────────────────────────────
//
// A lower level only acts inside the nullspace of the level above.

#[test]
fn test_lower_level_moves_only_in_nullspace() {
    let a0 = DMatrix::from_row_slice(2, 4, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    let b0 = DVector::from_vec(vec![1.0, 2.0]);
    let top = generic("top", a0.clone(), b0.clone());
    let bottom = generic("bottom", DMatrix::identity(4, 4), DVector::from_element(4, 5.0));
    let mut stack = AutoStack::new(top).unwrap().then(bottom).unwrap();

    let (solver, x) = solve(&mut stack, HqpConfig::default());
    let residual = (&a0 * &x - &b0).norm();
    assert!(residual < 1e-6, "top-level residual {residual:.3e}");
    // x₃ is free; x₁ − x₂ is free but the bottom target does not ask for it
    assert_close(&x, &[1.0, 1.0, 1.0, 5.0], 1e-6);

    assert_eq!(solver.reports()[0].nullspace_dimension, 2);
    assert_eq!(solver.reports()[1].variables, 2);
}

// ─── test 5 ───────────────────────────────────────────────────────────────────
//
// A nearly singular direction: σ = 0.01 under a threshold of 0.05.
// Raw least squares would step 100 along it.

#[test]
fn test_regularization_limits_weak_direction() {
    let a = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.01]));
    let b = DVector::from_element(2, 1.0);
    let mut stack = AutoStack::new(generic("weak", a, b)).unwrap();

    // A/b plus selective: H₂₂ = thr² + thr², g₂ = −σ·b₂
    let (solver, x) = solve(&mut stack, HqpConfig::default());
    assert_close(&x, &[1.0, 2.0], 1e-5);
    assert!((solver.reports()[0].threshold - 0.05).abs() < 1e-12);
    assert_eq!(solver.reports()[0].nullspace_dimension, 1);

    let only_ab = HqpConfig {
        perform_selective_nullspace_regularization: LevelSetting::Global(false),
        ..HqpConfig::default()
    };
    let (_, x) = solve(&mut stack, only_ab);
    assert_close(&x, &[1.0, 4.0], 1e-5);

    let (_, x) = solve(&mut stack, HqpConfig::unregularized());
    assert_close(&x, &[1.0, 100.0], 1e-2);
}

// ─── test 6 ───────────────────────────────────────────────────────────────────
//
// Per-level ratios set after construction show up in the thresholds.

#[test]
fn test_per_level_ratios() {
    let top = generic("top", DMatrix::from_row_slice(1, 3, &[2.0, 0.0, 0.0]), DVector::zeros(1));
    let bottom = generic("bottom", DMatrix::identity(3, 3), DVector::zeros(3));
    let mut stack = AutoStack::new(top).unwrap().then(bottom).unwrap();
    stack.update(&DVector::zeros(3)).unwrap();

    let mut solver = NullspaceHqp::new(&stack, HqpConfig::default()).unwrap();
    solver.set_min_singular_value_ratios(&[0.1, 0.3]).unwrap();
    solver.set_perform_ab_regularization(1, false).unwrap();
    solver.solve().unwrap();

    let reports = solver.reports();
    assert!((reports[0].threshold - 0.2).abs() < 1e-12, "thr₀ = {}", reports[0].threshold);
    assert!((reports[1].threshold - 0.3).abs() < 1e-12, "thr₁ = {}", reports[1].threshold);
    assert!(!solver.level_config(1).unwrap().perform_ab_regularization);
    assert!(solver.level_config(0).unwrap().perform_ab_regularization);

    assert!(matches!(
        solver.set_perform_selective_nullspace_regularization(2, true),
        Err(HqpError::LevelOutOfRange { level: 2, depth: 2 })
    ));
}

// ─── test 7 ───────────────────────────────────────────────────────────────────

#[test]
fn test_per_level_config_must_match_depth() {
    let stack = AutoStack::new(generic("only", DMatrix::identity(2, 2), DVector::zeros(2))).unwrap();
    let config = HqpConfig {
        min_singular_value_ratio: LevelSetting::PerLevel(vec![0.1, 0.2]),
        ..HqpConfig::default()
    };
    let err = NullspaceHqp::new(&stack, config).unwrap_err();
    assert!(matches!(err, HqpError::DimensionMismatch { expected: 1, actual: 2, .. }));
}

// ─── test 8 ───────────────────────────────────────────────────────────────────

#[test]
fn test_unregistered_back_end() {
    let stack = AutoStack::new(generic("only", DMatrix::identity(2, 2), DVector::zeros(2))).unwrap();
    let config = HqpConfig {
        back_end: BackEndKind::Osqp,
        ..HqpConfig::default()
    };
    let err = NullspaceHqp::new(&stack, config).unwrap_err();
    assert_eq!(err, HqpError::BackEndUnavailable("OSQP".into()));
}

// ─── test 9 ───────────────────────────────────────────────────────────────────
//
// An infeasible lower level names itself and leaves the last good solution.

#[test]
fn test_infeasible_level_is_reported() {
    let top = generic("top", DMatrix::from_row_slice(1, 2, &[0.0, 1.0]), DVector::from_element(1, 0.5));
    let bottom = generic("bottom", DMatrix::identity(2, 2), DVector::zeros(2));
    let mut stack = AutoStack::new(top).unwrap().then(bottom.clone()).unwrap();
    let (mut solver, good) = solve(&mut stack, HqpConfig::default());
    assert_close(&good, &[0.0, 0.5], 1e-6);

    // crossed sides: nothing satisfies 1 ≤ x₀ ≤ −1
    let crossed = constraint::shared(
        GenericConstraint::inequality(
            "crossed",
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DVector::from_element(1, 1.0),
            DVector::from_element(1, -1.0),
        )
        .unwrap(),
    );
    bottom.borrow_mut().constraints_mut().push(crossed);

    match solver.solve() {
        Err(HqpError::SolveFailure { level, task_id, .. }) => {
            assert_eq!(level, 1);
            assert_eq!(task_id, "bottom");
        }
        other => panic!("expected a solve failure, got {other:?}"),
    }
    assert_close(solver.solution(), &[0.0, 0.5], 1e-6);
    assert_eq!(solver.reports().len(), 2);
}

// ─── test 10 ──────────────────────────────────────────────────────────────────
//
// Re-solving after an update picks up the new reference.

#[test]
fn test_resolve_after_update() {
    let level = task::shared(GenericTask::new("t", DMatrix::identity(2, 2), DVector::from_element(2, 1.0)).unwrap());
    let mut stack = AutoStack::new(level.clone()).unwrap();
    let (mut solver, x) = solve(&mut stack, HqpConfig::default());
    assert_close(&x, &[1.0, 1.0], 1e-6);

    level.borrow_mut().set_lambda(0.25);
    stack.update(&DVector::zeros(2)).unwrap();
    let x = solver.solve().unwrap();
    assert_close(&x, &[0.25, 0.25], 1e-6);
}

// ─── test 11 ──────────────────────────────────────────────────────────────────
//
// Three levels, the top one wide and rank deficient.  Every accumulated
// nullspace basis is orthonormal, annihilates all the tasks above it, and
// the free dimension only shrinks going down.

#[test]
fn test_accumulated_nullspace_is_orthonormal() {
    let a0 = DMatrix::from_row_slice(2, 4, &[1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 0.0, 0.0]);
    let a1 = DMatrix::from_row_slice(1, 4, &[0.0, 0.0, 1.0, -1.0]);
    let a2 = DMatrix::<f64>::identity(4, 4);
    let top = generic("top", a0.clone(), DVector::from_vec(vec![1.0, 2.0]));
    let middle = generic("middle", a1.clone(), DVector::from_element(1, 0.5));
    let bottom = generic("bottom", a2.clone(), DVector::zeros(4));
    let mut stack = AutoStack::new(top).unwrap().then(middle).unwrap().then(bottom).unwrap();

    let (solver, x) = solve(&mut stack, HqpConfig::default());
    assert_close(&x, &[0.5, 0.5, 0.25, -0.25], 1e-6);

    let reports = solver.reports();
    let dims: Vec<usize> = reports.iter().map(|r| r.nullspace_dimension).collect();
    assert_eq!(dims, vec![3, 2, 0]);
    assert!(dims.windows(2).all(|w| w[1] <= w[0]), "nullspace grew: {dims:?}");

    let tasks = [&a0, &a1, &a2];
    for (k, report) in reports.iter().enumerate() {
        let basis = &report.nullspace_basis;
        assert_eq!(basis.shape(), (4, report.nullspace_dimension), "level {k} basis shape");

        let gram = basis.transpose() * basis;
        let off = (gram - DMatrix::<f64>::identity(basis.ncols(), basis.ncols())).norm();
        assert!(off < 1e-9, "level {k}: ‖NᵀN − I‖ = {off:.3e}");

        for (j, a) in tasks.iter().enumerate().take(k + 1) {
            let leak = (*a * basis).norm();
            assert!(leak < 1e-9, "level {k}: ‖A_{j}·N‖ = {leak:.3e}");
        }
    }
}
