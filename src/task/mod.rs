/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Weighted least-squares objectives.
//!
//! A task contributes `‖A·x − b‖²_W + cᵀx` to its priority level.  Concrete
//! task kinematics live outside this crate; anything that can produce `A`
//! and `b` each cycle implements [`Task`] by owning a [`TaskCore`] and
//! refreshing it from `update()`.
//!
//! | Type | Role |
//! |------|------|
//! | [`GenericTask`] | user-supplied `A`, `b`, staged setters |
//! | [`TaskAggregated`] | same-priority weighted sum of several tasks |
//! | [`AffineTask`] | task re-expressed over a new variable |

pub mod affine;
pub mod aggregated;
pub mod generic;

use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::constraint::ConstraintPtr;
use crate::error::{HqpError, Result};

pub use affine::AffineTask;
pub use aggregated::TaskAggregated;
pub use generic::GenericTask;

/// Shared, single-thread handle to any task.
pub type TaskPtr = Rc<RefCell<dyn Task>>;

/// Wrap a concrete task into a [`TaskPtr`].
pub fn shared<T: Task + 'static>(task: T) -> TaskPtr {
    Rc::new(RefCell::new(task))
}

// ─── HessianType ─────────────────────────────────────────────────────────────

/// Structural hint about `AᵀWA`, used by back ends that can exploit it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HessianType {
    /// `AᵀWA = 0`.
    Zero,
    /// Strictly positive definite.
    PositiveDefinite,
    /// Positive semi-definite.
    SemiDefinite,
    /// Exactly the identity.
    Identity,
    /// Nothing is known.
    #[default]
    Unknown,
}

impl HessianType {
    /// Shape of a sum of Hessians.
    ///
    /// A single term keeps its own tag.  Otherwise any `Unknown` wins, then
    /// any `PositiveDefinite` term, then all-zero, and semi-definite for
    /// everything else, identity terms included.
    pub fn combine(types: &[HessianType]) -> HessianType {
        if let [single] = types {
            return *single;
        }
        if types.contains(&Self::Unknown) {
            return Self::Unknown;
        }
        if types.contains(&Self::PositiveDefinite) {
            return Self::PositiveDefinite;
        }
        if types.iter().all(|t| *t == Self::Zero) {
            return Self::Zero;
        }
        Self::SemiDefinite
    }
}

// ─── TaskCore ────────────────────────────────────────────────────────────────

/// Matrices and bookkeeping shared by every task implementation.
#[derive(Debug)]
pub struct TaskCore {
    id: String,
    x_size: usize,
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
    weight: DMatrix<f64>,
    hessian_type: HessianType,
    lambda: f64,
    constraints: Vec<ConstraintPtr>,
}

impl TaskCore {
    /// Core with `A`, `b` given; `c = 0`, `W = I`, `λ = 1`, hessian unknown.
    pub fn new(id: impl Into<String>, a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        let id = id.into();
        let x_size = a.ncols();
        let rows = a.nrows();
        if b.len() != rows {
            return Err(HqpError::dimension(format!("task '{id}': b"), rows, b.len()));
        }
        Ok(Self {
            id,
            x_size,
            a,
            b,
            c: DVector::zeros(x_size),
            weight: DMatrix::identity(rows, rows),
            hessian_type: HessianType::Unknown,
            lambda: 1.0,
            constraints: Vec::new(),
        })
    }

    /// Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decision-vector size.
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Number of rows of `A`.
    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    /// Task matrix.
    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// Task reference.
    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    /// Linear term.
    pub fn c(&self) -> &DVector<f64> {
        &self.c
    }

    /// Row weight.
    pub fn weight(&self) -> &DMatrix<f64> {
        &self.weight
    }

    /// Hessian shape hint.
    pub fn hessian_type(&self) -> HessianType {
        self.hessian_type
    }

    /// Feedback gain.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Constraints attached to this task.
    pub fn constraints(&self) -> &[ConstraintPtr] {
        &self.constraints
    }

    /// Mutable constraint list.
    pub fn constraints_mut(&mut self) -> &mut Vec<ConstraintPtr> {
        &mut self.constraints
    }

    /// Install new `A` and `b`.
    ///
    /// If the row count changed and the weight no longer fits, the weight is
    /// reset to the identity.
    pub fn refresh(&mut self, a: DMatrix<f64>, b: DVector<f64>) -> Result<()> {
        if a.ncols() != self.x_size {
            return Err(HqpError::dimension(format!("task '{}': A columns", self.id), self.x_size, a.ncols()));
        }
        if b.len() != a.nrows() {
            return Err(HqpError::dimension(format!("task '{}': b", self.id), a.nrows(), b.len()));
        }
        if self.weight.nrows() != a.nrows() {
            warn!(task = %self.id, rows = a.nrows(), "task size changed, weight reset to identity");
            self.weight = DMatrix::identity(a.nrows(), a.nrows());
        }
        self.a = a;
        self.b = b;
        Ok(())
    }

    /// Set the linear term.
    pub fn set_c(&mut self, c: DVector<f64>) -> Result<()> {
        if c.len() != self.x_size {
            return Err(HqpError::dimension(format!("task '{}': c", self.id), self.x_size, c.len()));
        }
        self.c = c;
        Ok(())
    }

    /// Set the weight; it must be square with one row per task row.
    pub fn set_weight(&mut self, weight: DMatrix<f64>) -> Result<()> {
        let rows = self.rows();
        if weight.nrows() != rows {
            return Err(HqpError::dimension(format!("task '{}': weight rows", self.id), rows, weight.nrows()));
        }
        if weight.ncols() != rows {
            return Err(HqpError::dimension(format!("task '{}': weight columns", self.id), rows, weight.ncols()));
        }
        self.weight = weight;
        Ok(())
    }

    /// Set the hessian shape hint.
    pub fn set_hessian_type(&mut self, hessian_type: HessianType) {
        self.hessian_type = hessian_type;
    }

    /// Set the gain.  Negative or NaN gains are ignored; returns whether the value was taken.
    pub fn set_lambda(&mut self, lambda: f64) -> bool {
        if lambda >= 0.0 {
            self.lambda = lambda;
            true
        } else {
            warn!(task = %self.id, lambda, "negative gain ignored");
            false
        }
    }
}

// ─── Task trait ──────────────────────────────────────────────────────────────

/// A weighted least-squares objective over the decision vector.
pub trait Task: fmt::Debug {
    /// Shared state.
    fn core(&self) -> &TaskCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut TaskCore;

    /// Recompute `A`, `b` (and anything else) for the current control cycle.
    fn update(&mut self, state: &DVector<f64>) -> Result<()>;

    /// Identifier.
    fn id(&self) -> &str {
        self.core().id()
    }

    /// Decision-vector size.
    fn x_size(&self) -> usize {
        self.core().x_size()
    }

    /// Number of rows.
    fn rows(&self) -> usize {
        self.core().rows()
    }

    /// Task matrix.
    fn a(&self) -> &DMatrix<f64> {
        self.core().a()
    }

    /// Task reference.
    fn b(&self) -> &DVector<f64> {
        self.core().b()
    }

    /// Linear term.
    fn c(&self) -> &DVector<f64> {
        self.core().c()
    }

    /// Row weight.
    fn weight(&self) -> &DMatrix<f64> {
        self.core().weight()
    }

    /// Hessian shape hint.
    fn hessian_type(&self) -> HessianType {
        self.core().hessian_type()
    }

    /// Feedback gain.
    fn lambda(&self) -> f64 {
        self.core().lambda()
    }

    /// Constraints attached to this task.
    fn constraints(&self) -> &[ConstraintPtr] {
        self.core().constraints()
    }

    /// Constraint list open for appending.  Aggregations validate edits on
    /// their next `update()`.
    fn constraints_mut(&mut self) -> &mut Vec<ConstraintPtr> {
        self.core_mut().constraints_mut()
    }

    /// Set the row weight.
    fn set_weight(&mut self, weight: DMatrix<f64>) -> Result<()> {
        self.core_mut().set_weight(weight)
    }

    /// Set the feedback gain; negative values are ignored.
    fn set_lambda(&mut self, lambda: f64) {
        self.core_mut().set_lambda(lambda);
    }
}

/// Update a shared task, reporting re-entrant updates instead of panicking.
pub(crate) fn update_shared(ptr: &TaskPtr, state: &DVector<f64>) -> Result<()> {
    let mut t = ptr
        .try_borrow_mut()
        .map_err(|_| HqpError::InvariantViolation("task updated while already borrowed".into()))?;
    t.update(state)
}
