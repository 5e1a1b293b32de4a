/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Affine change of decision variable, `y = M·x + q`.
//!
//! Objectives and constraints written over `y` can be re-expressed over `x`
//! through [`crate::task::AffineTask`] and
//! [`crate::constraint::AffineConstraint`].  This is how a task defined on
//! joint velocities is reused when the QP variable is, say, velocities
//! stacked with contact forces.

use nalgebra::{DMatrix, DVector};

use crate::error::{HqpError, Result};

/// Affine map from the solver variable `x` (input) to `y` (output).
#[derive(Clone, Debug, PartialEq)]
pub struct AffineHelper {
    m: DMatrix<f64>,
    q: DVector<f64>,
}

impl AffineHelper {
    /// `y = M·x + q`.  `q` must have one entry per row of `M`.
    pub fn new(m: DMatrix<f64>, q: DVector<f64>) -> Result<Self> {
        if q.len() != m.nrows() {
            return Err(HqpError::dimension("affine offset", m.nrows(), q.len()));
        }
        Ok(Self { m, q })
    }

    /// `y = x` over `n` variables.
    pub fn identity(n: usize) -> Self {
        Self {
            m: DMatrix::identity(n, n),
            q: DVector::zeros(n),
        }
    }

    /// Select `len` consecutive entries of an `input_size` vector starting at `offset`.
    pub fn selection(input_size: usize, offset: usize, len: usize) -> Result<Self> {
        if offset + len > input_size {
            return Err(HqpError::dimension("affine selection", input_size, offset + len));
        }
        let mut m = DMatrix::zeros(len, input_size);
        for i in 0..len {
            m[(i, offset + i)] = 1.0;
        }
        Ok(Self {
            m,
            q: DVector::zeros(len),
        })
    }

    /// Size of `x`.
    pub fn input_size(&self) -> usize {
        self.m.ncols()
    }

    /// Size of `y`.
    pub fn output_size(&self) -> usize {
        self.m.nrows()
    }

    /// Linear part `M`.
    pub fn m(&self) -> &DMatrix<f64> {
        &self.m
    }

    /// Offset `q`.
    pub fn q(&self) -> &DVector<f64> {
        &self.q
    }

    /// Evaluate `M·x + q`.
    pub fn apply(&self, x: &DVector<f64>) -> Result<DVector<f64>> {
        if x.len() != self.input_size() {
            return Err(HqpError::dimension("affine input", self.input_size(), x.len()));
        }
        Ok(&self.m * x + &self.q)
    }
}
