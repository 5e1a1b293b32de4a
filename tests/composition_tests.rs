//! Integration tests for task and constraint composition feeding the solver:
//! aggregation, affine re-parameterisation and velocity allocation.

use hqp_core::{
    constraint, sum, task, AffineConstraint, AffineHelper, AffineTask, AutoStack, GenericConstraint, GenericTask,
    HqpConfig, HqpError, NullspaceHqp, Task, TaskAggregated, VelocityAllocation,
};
use nalgebra::{DMatrix, DVector};

// ─── helpers ─────────────────────────────────────────────────────────────────

fn target(id: &str, n: usize, value: f64) -> task::TaskPtr {
    task::shared(GenericTask::new(id, DMatrix::identity(n, n), DVector::from_element(n, value)).unwrap())
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

fn solve(stack: &mut AutoStack) -> DVector<f64> {
    stack.update(&DVector::zeros(stack.x_size())).unwrap();
    NullspaceHqp::new(stack, HqpConfig::default()).unwrap().solve().unwrap()
}

// ─── test 1 ───────────────────────────────────────────────────────────────────
//
// A constraint appended to an aggregated level is picked up on the next
// update and binds at that level; removing it afterwards is refused.

#[test]
fn test_constraint_added_to_aggregated_level() {
    let level = sum(target("a", 2, 2.0), target("b", 2, 2.0)).unwrap();
    assert_eq!(level.borrow().id(), "a+b");
    let mut stack = AutoStack::new(level.clone()).unwrap();
    assert_close(&solve(&mut stack), &[2.0, 2.0], 1e-6);

    let cap = constraint::shared(
        GenericConstraint::bound("cap", DVector::from_element(2, -10.0), DVector::from_element(2, 1.0)).unwrap(),
    );
    level.borrow_mut().constraints_mut().push(cap);
    assert_close(&solve(&mut stack), &[1.0, 1.0], 1e-6);
    assert_eq!(level.borrow().constraints().len(), 1);

    level.borrow_mut().constraints_mut().clear();
    let err = stack.update(&DVector::zeros(2)).unwrap_err();
    assert!(matches!(err, HqpError::InvariantViolation(_)));
}

// ─── test 2 ───────────────────────────────────────────────────────────────────
//
// 3‖x‖² + ‖x − 3‖² is minimised at x = 3/4.

#[test]
fn test_aggregated_weight_reaches_children() {
    let rest = target("rest", 2, 0.0);
    let goal = target("goal", 2, 3.0);
    let agg = task::shared(TaskAggregated::new(vec![rest.clone(), goal]).unwrap());
    let mut stack = AutoStack::new(agg.clone()).unwrap();
    assert_close(&solve(&mut stack), &[1.5, 1.5], 1e-6);

    let w = DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, 3.0, 1.0, 1.0]));
    agg.borrow_mut().set_weight(w).unwrap();
    assert_eq!(rest.borrow().weight()[(1, 1)], 3.0);
    assert_close(&solve(&mut stack), &[0.75, 0.75], 1e-6);
}

// ─── test 3 ───────────────────────────────────────────────────────────────────
//
// A task written over the last two variables, with a posture below it.

#[test]
fn test_affine_task_on_slice() {
    let inner = task::shared(GenericTask::new("hand", DMatrix::identity(2, 2), DVector::from_vec(vec![1.0, 2.0])).unwrap());
    let hand = task::shared(AffineTask::new(inner, AffineHelper::selection(4, 2, 2).unwrap()).unwrap());
    let mut stack = AutoStack::new(hand).unwrap().then(target("posture", 4, 0.0)).unwrap();
    assert_close(&solve(&mut stack), &[0.0, 0.0, 1.0, 2.0], 1e-6);
}

// ─── test 4 ───────────────────────────────────────────────────────────────────

#[test]
fn test_affine_bound_on_slice() {
    let inner = constraint::shared(
        GenericConstraint::bound("cap", DVector::from_element(2, -0.5), DVector::from_element(2, 0.5)).unwrap(),
    );
    let cap = constraint::shared(AffineConstraint::new(inner, AffineHelper::selection(4, 0, 2).unwrap()).unwrap());
    let mut stack = AutoStack::new(target("all", 4, 1.0)).unwrap().with_bound(cap).unwrap();
    assert_close(&solve(&mut stack), &[0.5, 0.5, 1.0, 1.0], 1e-6);
}

// ─── test 5 ───────────────────────────────────────────────────────────────────
//
// dt = 0.1, limits 2 → 4: the top level may move 0.2, the bottom one 0.4.

#[test]
fn test_velocity_allocation_per_level() {
    let top = task::shared(
        GenericTask::new("x0", DMatrix::from_row_slice(1, 2, &[1.0, 0.0]), DVector::from_element(1, 1.0)).unwrap(),
    );
    let mut stack = AutoStack::new(top.clone()).unwrap().then(target("both", 2, 1.0)).unwrap();
    VelocityAllocation::new(0.1, 2.0, 4.0).unwrap().apply(&stack).unwrap();
    assert_eq!(top.borrow().constraints().len(), 1);

    assert_close(&solve(&mut stack), &[0.2, 0.4], 1e-6);

    // applying again retunes in place
    VelocityAllocation::new(0.1, 1.0, 4.0).unwrap().apply(&stack).unwrap();
    assert_eq!(top.borrow().constraints().len(), 1);
    assert_close(&solve(&mut stack), &[0.1, 0.4], 1e-6);
}
