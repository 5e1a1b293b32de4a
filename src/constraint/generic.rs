/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Constraint with a caller-supplied payload.
//!
//! New numeric values are staged by the setters and become visible on the
//! next `update()`, so a half-written cycle never leaks into a solve.

use nalgebra::{DMatrix, DVector};

use super::{Constraint, ConstraintCore, ConstraintPayload};
use crate::error::Result;

/// Bound, inequality or equality with explicitly provided matrices.
#[derive(Clone, Debug)]
pub struct GenericConstraint {
    core: ConstraintCore,
    pending: Option<ConstraintPayload>,
}

impl GenericConstraint {
    /// `lower ≤ x ≤ upper`; the decision size is `lower.len()`.
    pub fn bound(id: impl Into<String>, lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        let n = lower.len();
        Self::with_payload(id, n, ConstraintPayload::Bound { lower, upper })
    }

    /// `lower ≤ A·x ≤ upper`; the decision size is `a.ncols()`.
    pub fn inequality(
        id: impl Into<String>,
        a: DMatrix<f64>,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> Result<Self> {
        let n = a.ncols();
        Self::with_payload(id, n, ConstraintPayload::Inequality { a, lower, upper })
    }

    /// `A·x = b`; the decision size is `a.ncols()`.
    pub fn equality(id: impl Into<String>, a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        let n = a.ncols();
        Self::with_payload(id, n, ConstraintPayload::Equality { a, b })
    }

    /// Build from an arbitrary payload over `x_size` variables.
    pub fn with_payload(id: impl Into<String>, x_size: usize, payload: ConstraintPayload) -> Result<Self> {
        Ok(Self {
            core: ConstraintCore::new(id, x_size, payload)?,
            pending: None,
        })
    }

    /// Stage new box bounds.  Fails if this is not a bound constraint.
    pub fn set_bounds(&mut self, lower: DVector<f64>, upper: DVector<f64>) -> Result<()> {
        self.stage(ConstraintPayload::Bound { lower, upper })
    }

    /// Stage a new inequality.  Fails if this is not an inequality.
    pub fn set_constraint(&mut self, a: DMatrix<f64>, lower: DVector<f64>, upper: DVector<f64>) -> Result<()> {
        self.stage(ConstraintPayload::Inequality { a, lower, upper })
    }

    /// Stage a new equality.  Fails if this is not an equality.
    pub fn set_equality(&mut self, a: DMatrix<f64>, b: DVector<f64>) -> Result<()> {
        self.stage(ConstraintPayload::Equality { a, b })
    }

    fn stage(&mut self, payload: ConstraintPayload) -> Result<()> {
        self.core.admit(&payload)?;
        self.pending = Some(payload);
        Ok(())
    }
}

impl Constraint for GenericConstraint {
    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn update(&mut self, _state: &DVector<f64>) -> Result<()> {
        if let Some(payload) = self.pending.take() {
            self.core.refresh(payload)?;
        }
        Ok(())
    }
}
