/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Linear constraints: box bounds, two-sided inequalities and equalities.
//!
//! A constraint's [`ConstraintKind`] is fixed when it is built; afterwards
//! only the numeric payload may change, and only through the owner's
//! `update()`.  [`ConstraintCore::refresh`] enforces both rules.
//!
//! | Type | Kind | Notes |
//! |------|------|-------|
//! | [`GenericConstraint`] | any | user-supplied payload, staged setters |
//! | [`ConstraintAggregated`] | inequality / bound | union of children |
//! | [`VelocityLimits`] | bound | `±q̇_max·dt` box |
//! | [`AffineConstraint`] | inequality | constraint re-expressed over a new variable |

pub mod affine;
pub mod aggregated;
pub mod generic;
pub mod velocity_limits;

use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};

use crate::error::{HqpError, Result};

pub use affine::AffineConstraint;
pub use aggregated::{AggregationMode, ConstraintAggregated};
pub use generic::GenericConstraint;
pub use velocity_limits::VelocityLimits;

/// Shared, single-thread handle to any constraint.
pub type ConstraintPtr = Rc<RefCell<dyn Constraint>>;

/// Wrap a concrete constraint into a [`ConstraintPtr`].
pub fn shared<C: Constraint + 'static>(constraint: C) -> ConstraintPtr {
    Rc::new(RefCell::new(constraint))
}

// ─── ConstraintKind / ConstraintPayload ──────────────────────────────────────

/// Which family a constraint belongs to.  Immutable after construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintKind {
    /// `lower ≤ x ≤ upper`.
    Bound,
    /// `lower ≤ A·x ≤ upper`.
    Inequality,
    /// `A·x = b`.
    Equality,
}

/// Numeric content of a constraint.  Infinite entries mean "unbounded side".
#[derive(Clone, Debug, PartialEq)]
pub enum ConstraintPayload {
    /// Box bound on the decision vector.
    Bound {
        /// Lower bound, length `n`.
        lower: DVector<f64>,
        /// Upper bound, length `n`.
        upper: DVector<f64>,
    },
    /// Two-sided linear inequality.
    Inequality {
        /// Constraint matrix, `r × n`.
        a: DMatrix<f64>,
        /// Lower bound, length `r`.
        lower: DVector<f64>,
        /// Upper bound, length `r`.
        upper: DVector<f64>,
    },
    /// Linear equality.
    Equality {
        /// Constraint matrix, `r × n`.
        a: DMatrix<f64>,
        /// Right-hand side, length `r`.
        b: DVector<f64>,
    },
}

impl ConstraintPayload {
    /// Kind tag of this payload.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::Bound { .. } => ConstraintKind::Bound,
            Self::Inequality { .. } => ConstraintKind::Inequality,
            Self::Equality { .. } => ConstraintKind::Equality,
        }
    }

    /// Number of scalar constraints.
    pub fn rows(&self) -> usize {
        match self {
            Self::Bound { lower, .. } => lower.len(),
            Self::Inequality { a, .. } | Self::Equality { a, .. } => a.nrows(),
        }
    }

    /// An inequality with no rows over `x_size` variables.
    pub fn empty_inequality(x_size: usize) -> Self {
        Self::Inequality {
            a: DMatrix::zeros(0, x_size),
            lower: DVector::zeros(0),
            upper: DVector::zeros(0),
        }
    }

    /// Verify every operand against the decision size `x_size`.
    pub fn check(&self, x_size: usize, context: &str) -> Result<()> {
        match self {
            Self::Bound { lower, upper } => {
                if lower.len() != x_size {
                    return Err(HqpError::dimension(format!("{context}: lower bound"), x_size, lower.len()));
                }
                if upper.len() != x_size {
                    return Err(HqpError::dimension(format!("{context}: upper bound"), x_size, upper.len()));
                }
            }
            Self::Inequality { a, lower, upper } => {
                if a.ncols() != x_size {
                    return Err(HqpError::dimension(format!("{context}: A_ineq columns"), x_size, a.ncols()));
                }
                if lower.len() != a.nrows() {
                    return Err(HqpError::dimension(format!("{context}: lower bound"), a.nrows(), lower.len()));
                }
                if upper.len() != a.nrows() {
                    return Err(HqpError::dimension(format!("{context}: upper bound"), a.nrows(), upper.len()));
                }
            }
            Self::Equality { a, b } => {
                if a.ncols() != x_size {
                    return Err(HqpError::dimension(format!("{context}: A_eq columns"), x_size, a.ncols()));
                }
                if b.len() != a.nrows() {
                    return Err(HqpError::dimension(format!("{context}: b_eq"), a.nrows(), b.len()));
                }
            }
        }
        Ok(())
    }

    /// Rewrite as two-sided rows `lower ≤ A·x ≤ upper`.
    ///
    /// Bounds become identity rows; equalities become rows with
    /// `lower = upper = b`.
    pub fn to_rows(&self) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
        match self {
            Self::Bound { lower, upper } => {
                (DMatrix::identity(lower.len(), lower.len()), lower.clone(), upper.clone())
            }
            Self::Inequality { a, lower, upper } => (a.clone(), lower.clone(), upper.clone()),
            Self::Equality { a, b } => (a.clone(), b.clone(), b.clone()),
        }
    }
}

// ─── ConstraintCore ──────────────────────────────────────────────────────────

/// State shared by every constraint implementation.
#[derive(Clone, Debug)]
pub struct ConstraintCore {
    id: String,
    x_size: usize,
    payload: ConstraintPayload,
}

impl ConstraintCore {
    /// Build a core, validating the payload against `x_size`.
    pub fn new(id: impl Into<String>, x_size: usize, payload: ConstraintPayload) -> Result<Self> {
        let id = id.into();
        payload.check(x_size, &id)?;
        Ok(Self { id, x_size, payload })
    }

    /// Identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decision-vector size.
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Current payload.
    pub fn payload(&self) -> &ConstraintPayload {
        &self.payload
    }

    /// Replace the numeric payload.  The kind must not change.
    pub fn refresh(&mut self, payload: ConstraintPayload) -> Result<()> {
        self.admit(&payload)?;
        self.payload = payload;
        Ok(())
    }

    /// Check that `payload` could replace the current one.
    pub fn admit(&self, payload: &ConstraintPayload) -> Result<()> {
        if payload.kind() != self.payload.kind() {
            return Err(HqpError::InvariantViolation(format!(
                "constraint '{}' is {:?}; cannot refresh it with a {:?} payload",
                self.id,
                self.payload.kind(),
                payload.kind()
            )));
        }
        payload.check(self.x_size, &self.id)
    }
}

// ─── Constraint trait ────────────────────────────────────────────────────────

/// A linear constraint on the decision vector.
pub trait Constraint: fmt::Debug {
    /// Shared state.
    fn core(&self) -> &ConstraintCore;

    /// Refresh the numeric payload for the current control cycle.
    fn update(&mut self, state: &DVector<f64>) -> Result<()>;

    /// Identifier.
    fn id(&self) -> &str {
        self.core().id()
    }

    /// Decision-vector size.
    fn x_size(&self) -> usize {
        self.core().x_size()
    }

    /// Kind tag.
    fn kind(&self) -> ConstraintKind {
        self.core().payload().kind()
    }

    /// Current payload.
    fn payload(&self) -> &ConstraintPayload {
        self.core().payload()
    }

    /// `true` for box bounds.
    fn is_bound(&self) -> bool {
        self.kind() == ConstraintKind::Bound
    }

    /// `true` for two-sided inequalities.
    fn is_inequality(&self) -> bool {
        self.kind() == ConstraintKind::Inequality
    }

    /// `true` for equalities.
    fn is_equality(&self) -> bool {
        self.kind() == ConstraintKind::Equality
    }

    /// Child constraints, for aggregations.
    fn children(&self) -> Option<&[ConstraintPtr]> {
        None
    }

    /// Capability query for velocity limits.
    fn as_velocity_limits(&self) -> Option<&VelocityLimits> {
        None
    }

    /// Mutable capability query for velocity limits.
    fn as_velocity_limits_mut(&mut self) -> Option<&mut VelocityLimits> {
        None
    }
}

/// Join child ids with `+`, in order.
pub fn compose_id<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    ids.into_iter().collect::<Vec<_>>().join("+")
}

/// Update a shared constraint, reporting re-entrant updates instead of panicking.
pub(crate) fn update_shared(ptr: &ConstraintPtr, state: &DVector<f64>) -> Result<()> {
    let mut c = ptr.try_borrow_mut().map_err(|_| {
        HqpError::InvariantViolation("constraint updated while already borrowed (self-containing aggregation?)".into())
    })?;
    c.update(state)
}

/// Identity of a shared allocation, independent of the vtable.
pub(crate) fn address<T: ?Sized>(ptr: &Rc<T>) -> usize {
    Rc::as_ptr(ptr) as *const () as usize
}

/// `true` if `root` is, or transitively contains, the allocation at `target`.
///
/// A constraint that is currently mutably borrowed is being updated higher
/// up the call chain, so it is treated as reachable.
pub(crate) fn reaches(root: &ConstraintPtr, target: usize) -> bool {
    if address(root) == target {
        return true;
    }
    match root.try_borrow() {
        Ok(c) => c
            .children()
            .map_or(false, |children| children.iter().any(|c| reaches(c, target))),
        Err(_) => true,
    }
}
