/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Ordered priority levels sharing one set of global constraints.
//!
//! ```text
//! level 0   (highest)  ─┐
//! level 1               │  every level sees `bounds`
//! …                     │
//! level K−1 (lowest)   ─┘
//! ```
//!
//! Levels are shared handles: the same task may be tuned from outside while
//! it sits in a stack.  [`AutoStack::update`] must run once per control cycle
//! before solving; a stale stack solves with the previous cycle's numbers.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::DVector;

use crate::constraint::{
    address, update_shared as update_constraint, AggregationMode, Constraint, ConstraintAggregated, ConstraintPtr,
};
use crate::error::{HqpError, Result};
use crate::task::{self, update_shared as update_task, TaskAggregated, TaskPtr};

/// Two tasks at the same priority, as one aggregated task.
pub fn sum(first: TaskPtr, second: TaskPtr) -> Result<TaskPtr> {
    Ok(task::shared(TaskAggregated::pair(first, second)?))
}

/// A stack of priority levels plus the constraints applied to all of them.
#[derive(Debug)]
pub struct AutoStack {
    levels: Vec<TaskPtr>,
    bounds: Rc<RefCell<ConstraintAggregated>>,
    x_size: usize,
}

impl AutoStack {
    /// One-level stack; bounds are stacked as inequality rows.
    pub fn new(level: TaskPtr) -> Result<Self> {
        Self::with_mode(level, AggregationMode::Stacked)
    }

    /// One-level stack whose bounds aggregate in `mode`.
    ///
    /// [`AggregationMode::PureBounds`] keeps the bounds a box, which the
    /// solver hands to the top level as simple variable bounds.
    pub fn with_mode(level: TaskPtr, mode: AggregationMode) -> Result<Self> {
        let x_size = level.borrow().x_size();
        let bounds = ConstraintAggregated::new(Vec::new(), x_size, mode)?;
        Ok(Self {
            levels: vec![level],
            bounds: Rc::new(RefCell::new(bounds)),
            x_size,
        })
    }

    /// Append `level` below the current lowest level.
    pub fn then(mut self, level: TaskPtr) -> Result<Self> {
        self.push_level(level)?;
        Ok(self)
    }

    /// Append every level of `lower` below this stack and adopt its bounds.
    pub fn append(mut self, lower: AutoStack) -> Result<Self> {
        if lower.x_size != self.x_size {
            return Err(HqpError::dimension("appended stack decision size", self.x_size, lower.x_size));
        }
        let adopted: Vec<ConstraintPtr> = lower
            .bounds
            .borrow()
            .children()
            .map(<[ConstraintPtr]>::to_vec)
            .unwrap_or_default();
        for level in lower.levels {
            self.push_level(level)?;
        }
        for c in adopted {
            self.add_bound(c)?;
        }
        Ok(self)
    }

    /// Builder form of [`AutoStack::add_bound`].
    pub fn with_bound(mut self, constraint: ConstraintPtr) -> Result<Self> {
        self.add_bound(constraint)?;
        Ok(self)
    }

    /// Add a constraint applied at every level.
    pub fn add_bound(&mut self, constraint: ConstraintPtr) -> Result<()> {
        let own = address(&self.bounds);
        self.bounds.borrow_mut().push(constraint, own)
    }

    fn push_level(&mut self, level: TaskPtr) -> Result<()> {
        let n = level.borrow().x_size();
        if n != self.x_size {
            return Err(HqpError::dimension(format!("level {} decision size", self.levels.len()), self.x_size, n));
        }
        self.levels.push(level);
        Ok(())
    }

    /// Refresh every level and the bounds for state `state`.
    pub fn update(&mut self, state: &DVector<f64>) -> Result<()> {
        for level in &self.levels {
            update_task(level, state)?;
        }
        let bounds: ConstraintPtr = self.bounds.clone();
        update_constraint(&bounds, state)
    }

    /// Levels, highest priority first.
    pub fn levels(&self) -> &[TaskPtr] {
        &self.levels
    }

    /// Level `index`, if present.
    pub fn level(&self, index: usize) -> Option<&TaskPtr> {
        self.levels.get(index)
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Decision-vector size.
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Shared handle to the global constraints.
    pub fn bounds(&self) -> ConstraintPtr {
        self.bounds.clone()
    }
}
