/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! A task on `y` re-expressed over `x` with `y = M·x + q`.

use nalgebra::{DMatrix, DVector};

use super::{update_shared, HessianType, Task, TaskCore, TaskPtr};
use crate::affine::AffineHelper;
use crate::error::{HqpError, Result};

/// Wraps a task over `y`:
/// `A' = A·M`, `b' = b − A·q`, `c' = Mᵀ·c`, same `W` and `λ`.
///
/// Constraints of the wrapped task are written over `y` and are not
/// inherited; constraints over `x` go on this task's own list.
#[derive(Debug)]
pub struct AffineTask {
    core: TaskCore,
    inner: TaskPtr,
    var: AffineHelper,
}

impl AffineTask {
    /// Re-express `inner` through `var`.  `inner` must be sized for `var`'s output.
    pub fn new(inner: TaskPtr, var: AffineHelper) -> Result<Self> {
        let core = {
            let t = inner.borrow();
            if t.x_size() != var.output_size() {
                return Err(HqpError::dimension(
                    format!("affine task '{}'", t.id()),
                    var.output_size(),
                    t.x_size(),
                ));
            }
            let (a, b, c) = transform(&*t, &var);
            let mut core = TaskCore::new(format!("Affine{}", t.id()), a, b)?;
            core.set_c(c)?;
            core.set_weight(t.weight().clone())?;
            core.set_lambda(t.lambda());
            core.set_hessian_type(hessian_of(t.hessian_type()));
            core
        };
        Ok(Self { core, inner, var })
    }

    /// Wrapped task.
    pub fn inner(&self) -> &TaskPtr {
        &self.inner
    }

    /// Variable map.
    pub fn var(&self) -> &AffineHelper {
        &self.var
    }
}

fn transform(t: &dyn Task, var: &AffineHelper) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
    let a = t.a() * var.m();
    let b = t.b() - t.a() * var.q();
    let c = var.m().transpose() * t.c();
    (a, b, c)
}

/// `MᵀAᵀWAM` stays zero when `AᵀWA` is; nothing else survives an arbitrary `M`.
fn hessian_of(inner: HessianType) -> HessianType {
    match inner {
        HessianType::Zero => HessianType::Zero,
        _ => HessianType::Unknown,
    }
}

impl Task for AffineTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn update(&mut self, state: &DVector<f64>) -> Result<()> {
        update_shared(&self.inner, state)?;
        let t = self.inner.borrow();
        let (a, b, c) = transform(&*t, &self.var);
        self.core.refresh(a, b)?;
        self.core.set_c(c)?;
        self.core.set_weight(t.weight().clone())?;
        self.core.set_hessian_type(hessian_of(t.hessian_type()));
        Ok(())
    }

    fn set_weight(&mut self, weight: DMatrix<f64>) -> Result<()> {
        self.inner.borrow_mut().set_weight(weight.clone())?;
        self.core.set_weight(weight)
    }

    fn set_lambda(&mut self, lambda: f64) {
        if self.core.set_lambda(lambda) {
            self.inner.borrow_mut().set_lambda(lambda);
        }
    }
}
