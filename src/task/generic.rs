/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Task with caller-supplied matrices.
//!
//! Setters stage values; `update()` installs them with `b = λ·b_ref`.

use nalgebra::{DMatrix, DVector};

use super::{HessianType, Task, TaskCore};
use crate::error::{HqpError, Result};

/// `‖A·x − λ·b_ref‖²_W + cᵀx` with user-provided `A`, `b_ref`, `c`.
#[derive(Debug)]
pub struct GenericTask {
    core: TaskCore,
    a_next: DMatrix<f64>,
    b_ref: DVector<f64>,
    c_next: DVector<f64>,
}

impl GenericTask {
    /// Build from `A` (`m × n`) and `b` (`m`).
    pub fn new(id: impl Into<String>, a: DMatrix<f64>, b: DVector<f64>) -> Result<Self> {
        let core = TaskCore::new(id, a.clone(), b.clone())?;
        let c_next = DVector::zeros(core.x_size());
        Ok(Self {
            core,
            a_next: a,
            b_ref: b,
            c_next,
        })
    }

    /// Stage a new task matrix; the column count must not change.
    pub fn set_a(&mut self, a: DMatrix<f64>) -> Result<()> {
        if a.ncols() != self.core.x_size() {
            return Err(HqpError::dimension(
                format!("task '{}': A columns", self.core.id()),
                self.core.x_size(),
                a.ncols(),
            ));
        }
        self.a_next = a;
        Ok(())
    }

    /// Stage a new reference; checked against `A` on the next update.
    pub fn set_b(&mut self, b: DVector<f64>) {
        self.b_ref = b;
    }

    /// Stage a new linear term.
    pub fn set_c(&mut self, c: DVector<f64>) -> Result<()> {
        if c.len() != self.core.x_size() {
            return Err(HqpError::dimension(
                format!("task '{}': c", self.core.id()),
                self.core.x_size(),
                c.len(),
            ));
        }
        self.c_next = c;
        Ok(())
    }

    /// Set the hessian shape hint.
    pub fn set_hessian_type(&mut self, hessian_type: HessianType) {
        self.core.set_hessian_type(hessian_type);
    }
}

impl Task for GenericTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn update(&mut self, _state: &DVector<f64>) -> Result<()> {
        let b = &self.b_ref * self.core.lambda();
        self.core.refresh(self.a_next.clone(), b)?;
        self.core.set_c(self.c_next.clone())
    }
}
