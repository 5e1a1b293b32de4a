//! # Simple hierarchical QP
//!
//! Part one solves a single constrained least-squares problem.  Part two runs
//! a short velocity-control loop on a 4-joint toy arm: a "hand" task on the
//! first two joints has priority over a posture task, every joint is
//! velocity limited, and the joint positions integrate the solution.

use std::cell::RefCell;
use std::rc::Rc;

use hqp_core::{
    constraint, task, AutoStack, GenericConstraint, GenericTask, HqpConfig, NullspaceHqp, Result, Task, TaskPtr,
    VelocityAllocation,
};
use nalgebra::{DMatrix, DVector};

// ── Part one ─────────────────────────────────────────────────────────────────

fn simple_qp() -> Result<()> {
    let n = 5;
    let target = task::shared(GenericTask::new("target", DMatrix::identity(n, n), DVector::from_element(n, 2.0))?);
    let sum = constraint::shared(GenericConstraint::inequality(
        "sum",
        DMatrix::from_element(1, n, 1.0),
        DVector::from_element(1, -1.0),
        DVector::from_element(1, 0.3),
    )?);
    let mut stack = AutoStack::new(target)?.with_bound(sum)?;
    stack.update(&DVector::zeros(n))?;

    let mut solver = NullspaceHqp::new(&stack, HqpConfig::default())?;
    let x = solver.solve()?;
    println!("min ‖x − 2‖²  s.t.  −1 ≤ Σx ≤ 0.3");
    println!("  x  = {:?}", x.as_slice());
    println!("  Σx = {:.4}", x.sum());
    Ok(())
}

// ── Part two ─────────────────────────────────────────────────────────────────

fn control_loop() -> Result<()> {
    const DT: f64 = 0.01;
    const CYCLES: usize = 200;
    const HAND_GOAL: f64 = 0.8;

    // concrete handles for setting references; the stack holds the same cells
    let hand = Rc::new(RefCell::new(GenericTask::new(
        "hand",
        DMatrix::from_row_slice(1, 4, &[1.0, 1.0, 0.0, 0.0]),
        DVector::zeros(1),
    )?));
    let posture = Rc::new(RefCell::new(GenericTask::new("posture", DMatrix::identity(4, 4), DVector::zeros(4))?));
    hand.borrow_mut().set_lambda(0.1);
    posture.borrow_mut().set_lambda(0.05);

    let hand_level: TaskPtr = hand.clone();
    let posture_level: TaskPtr = posture.clone();
    let mut stack = AutoStack::new(hand_level)?.then(posture_level)?;
    VelocityAllocation::new(DT, 2.0, 5.0)?.apply(&stack)?;

    let mut q = DVector::from_vec(vec![0.0, 0.0, 0.3, -0.3]);
    let mut solver = NullspaceHqp::new(&stack, HqpConfig::default())?;

    println!("\ncycle   hand    q");
    for cycle in 0..CYCLES {
        // references follow the state; λ scales them on update
        hand.borrow_mut().set_b(DVector::from_element(1, HAND_GOAL - (q[0] + q[1])));
        posture.borrow_mut().set_b(-&q);

        stack.update(&q)?;
        q += solver.solve()?;

        if cycle % 40 == 0 || cycle + 1 == CYCLES {
            let rounded: Vec<f64> = q.iter().map(|v| (v * 1e4).round() / 1e4).collect();
            println!("{cycle:5}   {:.4}  {rounded:?}", q[0] + q[1]);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    simple_qp()?;
    control_loop()
}
