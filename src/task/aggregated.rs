/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Same-priority sum of tasks.
//!
//! Matrices are stacked in child order:
//!
//! ```text
//! A = [A_1; …; A_N]    b = [b_1; …; b_N]    c = Σ c_i    W = diag(W_1, …, W_N)
//! ```
//!
//! The constraint list is the union of every child's constraints (inherited)
//! followed by constraints added directly to the aggregation (own).  Callers
//! may append through [`Task::constraints_mut`]; on the next `update()` the
//! list is compared with the one produced by the previous update and only
//! pure additions are accepted.

use hashbrown::{HashMap, HashSet};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

use super::{update_shared, HessianType, Task, TaskCore, TaskPtr};
use crate::constraint::{address, compose_id, ConstraintPtr};
use crate::error::{HqpError, Result};
use crate::linalg::{block_diag, vstack, vstack_vectors};

/// Weighted sum of tasks sharing one decision vector.
#[derive(Debug)]
pub struct TaskAggregated {
    core: TaskCore,
    tasks: Vec<TaskPtr>,
    own: Vec<ConstraintPtr>,
    /// Constraint list as produced by the last rebuild.
    expected: Vec<ConstraintPtr>,
}

impl TaskAggregated {
    /// Aggregate a non-empty list of tasks with equal decision size.
    pub fn new(tasks: Vec<TaskPtr>) -> Result<Self> {
        let first = tasks
            .first()
            .ok_or_else(|| HqpError::InvariantViolation("a task aggregation needs at least one task".into()))?;
        let x_size = first.borrow().x_size();
        for t in &tasks {
            let t = t.borrow();
            if t.x_size() != x_size {
                return Err(HqpError::dimension(format!("task '{}' decision size", t.id()), x_size, t.x_size()));
            }
        }

        let ids: Vec<String> = tasks.iter().map(|t| t.borrow().id().to_owned()).collect();
        let id = compose_id(ids.iter().map(String::as_str));
        let (a, b) = stack(&tasks, x_size)?;
        let mut aggregated = Self {
            core: TaskCore::new(id, a, b)?,
            tasks,
            own: Vec::new(),
            expected: Vec::new(),
        };
        aggregated.gather_terms()?;
        aggregated.rebuild_constraints();
        Ok(aggregated)
    }

    /// Two tasks at the same priority.
    pub fn pair(first: TaskPtr, second: TaskPtr) -> Result<Self> {
        Self::new(vec![first, second])
    }

    /// Aggregated tasks, in stacking order.
    pub fn tasks(&self) -> &[TaskPtr] {
        &self.tasks
    }

    /// Constraints added to the aggregation itself.
    pub fn own_constraints(&self) -> &[ConstraintPtr] {
        &self.own
    }

    /// Collect `c`, `W` and the hessian tag from the children.
    fn gather_terms(&mut self) -> Result<()> {
        let mut c = DVector::zeros(self.core.x_size());
        let mut types = Vec::with_capacity(self.tasks.len());
        let weights: Vec<DMatrix<f64>> = self
            .tasks
            .iter()
            .map(|t| {
                let t = t.borrow();
                c += t.c();
                types.push(t.hessian_type());
                t.weight().clone()
            })
            .collect();
        let refs: Vec<&DMatrix<f64>> = weights.iter().collect();
        self.core.set_c(c)?;
        self.core.set_weight(block_diag(&refs))?;
        self.core.set_hessian_type(HessianType::combine(&types));
        Ok(())
    }

    /// Check caller edits against the previous list and record additions.
    fn reconcile(&mut self) -> Result<()> {
        let current = self.core.constraints();
        let expected = &self.expected;

        if current.len() < expected.len() {
            return Err(HqpError::InvariantViolation(format!(
                "constraints of '{}' can only be added, not removed ({} → {})",
                self.core.id(),
                expected.len(),
                current.len()
            )));
        }

        let mut balance: HashMap<usize, isize> = HashMap::new();
        for c in current {
            *balance.entry(address(c)).or_insert(0) += 1;
        }
        for c in expected {
            *balance.entry(address(c)).or_insert(0) -= 1;
        }
        let difference: usize = balance.values().map(|v| v.unsigned_abs()).sum();

        if current.len() == expected.len() {
            if difference != 0 {
                warn!(task = %self.core.id(), "same-size edit of the constraint list discarded");
            }
            return Ok(());
        }

        if difference != current.len() - expected.len() {
            return Err(HqpError::InvariantViolation(format!(
                "constraint list of '{}' grew but some existing entries were removed or replaced",
                self.core.id()
            )));
        }

        let mut added = Vec::new();
        for c in current {
            if let Some(n) = balance.get_mut(&address(c)) {
                if *n > 0 {
                    *n -= 1;
                    added.push(c.clone());
                }
            }
        }
        self.own.extend(added);
        Ok(())
    }

    /// Inherited constraints first, then own ones, each at most once.
    fn rebuild_constraints(&mut self) {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        let inherited: Vec<ConstraintPtr> = self
            .tasks
            .iter()
            .flat_map(|t| t.borrow().constraints().to_vec())
            .collect();
        for c in inherited.into_iter().chain(self.own.iter().cloned()) {
            if seen.insert(address(&c)) {
                list.push(c);
            }
        }
        self.expected = list.clone();
        *self.core.constraints_mut() = list;
    }
}

fn stack(tasks: &[TaskPtr], x_size: usize) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let borrowed: Vec<_> = tasks.iter().map(|t| t.borrow()).collect();
    let a_blocks: Vec<&DMatrix<f64>> = borrowed.iter().map(|t| t.a()).collect();
    let b_blocks: Vec<&DVector<f64>> = borrowed.iter().map(|t| t.b()).collect();
    Ok((vstack(&a_blocks, x_size, "aggregated task A")?, vstack_vectors(&b_blocks)))
}

impl Task for TaskAggregated {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn update(&mut self, state: &DVector<f64>) -> Result<()> {
        for t in &self.tasks {
            update_shared(t, state)?;
        }
        let (a, b) = stack(&self.tasks, self.core.x_size())?;
        self.core.refresh(a, b)?;
        self.gather_terms()?;
        self.reconcile()?;
        self.rebuild_constraints();
        Ok(())
    }

    /// Slice `weight` into the children's diagonal blocks.
    ///
    /// Off-diagonal blocks are dropped: the stored weight is rebuilt from
    /// the children.
    fn set_weight(&mut self, weight: DMatrix<f64>) -> Result<()> {
        let rows = self.core.rows();
        if weight.nrows() != rows || weight.ncols() != rows {
            let actual = if weight.nrows() != rows { weight.nrows() } else { weight.ncols() };
            return Err(HqpError::dimension(format!("task '{}': weight", self.core.id()), rows, actual));
        }
        let mut offset = 0;
        for t in &self.tasks {
            let mut t = t.borrow_mut();
            let m = t.rows();
            t.set_weight(weight.view((offset, offset), (m, m)).into_owned())?;
            offset += m;
        }
        self.gather_terms()
    }

    /// Set the gain here and on every child; negative values are ignored.
    fn set_lambda(&mut self, lambda: f64) {
        if self.core.set_lambda(lambda) {
            for t in &self.tasks {
                t.borrow_mut().set_lambda(lambda);
            }
        }
    }
}
