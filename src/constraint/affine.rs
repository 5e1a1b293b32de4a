/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! A constraint on `y` re-expressed over `x` with `y = M·x + q`.

use nalgebra::DVector;

use super::{update_shared, Constraint, ConstraintCore, ConstraintPayload, ConstraintPtr};
use crate::affine::AffineHelper;
use crate::error::{HqpError, Result};

/// Wraps a constraint over `y`; always exposes an inequality over `x`.
#[derive(Debug)]
pub struct AffineConstraint {
    core: ConstraintCore,
    inner: ConstraintPtr,
    var: AffineHelper,
}

impl AffineConstraint {
    /// Re-express `inner` through `var`.  `inner` must be sized for `var`'s output.
    pub fn new(inner: ConstraintPtr, var: AffineHelper) -> Result<Self> {
        let (id, payload) = {
            let c = inner.borrow();
            if c.x_size() != var.output_size() {
                return Err(HqpError::dimension(
                    format!("affine constraint '{}'", c.id()),
                    var.output_size(),
                    c.x_size(),
                ));
            }
            (format!("Affine{}", c.id()), transform(c.payload(), &var))
        };
        Ok(Self {
            core: ConstraintCore::new(id, var.input_size(), payload)?,
            inner,
            var,
        })
    }

    /// Wrapped constraint.
    pub fn inner(&self) -> &ConstraintPtr {
        &self.inner
    }
}

/// `lower ≤ A·(M·x + q) ≤ upper` rewritten as `lower − A·q ≤ (A·M)·x ≤ upper − A·q`.
fn transform(payload: &ConstraintPayload, var: &AffineHelper) -> ConstraintPayload {
    let (a, lower, upper) = payload.to_rows();
    let shift = &a * var.q();
    ConstraintPayload::Inequality {
        a: a * var.m(),
        lower: lower - &shift,
        upper: upper - shift,
    }
}

impl Constraint for AffineConstraint {
    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn update(&mut self, state: &DVector<f64>) -> Result<()> {
        update_shared(&self.inner, state)?;
        let payload = transform(self.inner.borrow().payload(), &self.var);
        self.core.refresh(payload)
    }

    fn children(&self) -> Option<&[ConstraintPtr]> {
        Some(core::slice::from_ref(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{shared, GenericConstraint};
    use nalgebra::DMatrix;

    #[test]
    fn bound_on_slice_becomes_selection_rows() {
        let inner = shared(
            GenericConstraint::bound("box", DVector::from_element(2, -1.0), DVector::from_element(2, 1.0)).unwrap(),
        );
        let var = AffineHelper::selection(4, 2, 2).unwrap();
        let c = AffineConstraint::new(inner, var).unwrap();
        assert_eq!(c.id(), "Affinebox");
        assert_eq!(c.x_size(), 4);
        match c.payload() {
            ConstraintPayload::Inequality { a, lower, .. } => {
                assert_eq!(a.shape(), (2, 4));
                assert_eq!(a[(0, 2)], 1.0);
                assert_eq!(a[(0, 0)], 0.0);
                assert_eq!(lower[1], -1.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn offset_shifts_bounds() {
        let inner = shared(
            GenericConstraint::equality("eq", DMatrix::identity(1, 1), DVector::from_element(1, 3.0)).unwrap(),
        );
        // y = 2x + 1, y = 3  →  2x = 2
        let var = AffineHelper::new(DMatrix::from_element(1, 1, 2.0), DVector::from_element(1, 1.0)).unwrap();
        let c = AffineConstraint::new(inner, var).unwrap();
        match c.payload() {
            ConstraintPayload::Inequality { a, lower, upper } => {
                assert_eq!(a[(0, 0)], 2.0);
                assert_eq!(lower[0], 2.0);
                assert_eq!(upper[0], 2.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let inner = shared(
            GenericConstraint::bound("box", DVector::from_element(3, -1.0), DVector::from_element(3, 1.0)).unwrap(),
        );
        assert!(AffineConstraint::new(inner, AffineHelper::identity(2)).is_err());
    }
}
