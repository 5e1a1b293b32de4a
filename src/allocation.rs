/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Velocity limits spread over the levels of a stack.
//!
//! Higher-priority levels get tighter limits so that lower levels keep
//! authority to correct them:
//!
//! ```text
//! limit_i = min + i·(max − min)/(K − 1)      i = 0 … K−1
//! ```
//!
//! A one-level stack gets `min`.  Velocity limits among the stack bounds are
//! set to `max`.

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::constraint::{self, Constraint, ConstraintPtr, VelocityLimits};
use crate::error::{HqpError, Result};
use crate::stack::AutoStack;

/// Linear velocity-limit schedule from `min` at the top to `max` at the bottom.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VelocityAllocation {
    dt: f64,
    min_velocity: f64,
    max_velocity: f64,
}

impl VelocityAllocation {
    /// Schedule over a period `dt` (> 0) with `0 ≤ min ≤ max`.
    pub fn new(dt: f64, min_velocity: f64, max_velocity: f64) -> Result<Self> {
        if !(dt > 0.0) {
            return Err(HqpError::InvalidParameter { name: "dt", value: dt });
        }
        if !(min_velocity >= 0.0) {
            return Err(HqpError::InvalidParameter {
                name: "min_velocity",
                value: min_velocity,
            });
        }
        if !(max_velocity >= min_velocity) {
            return Err(HqpError::InvalidParameter {
                name: "max_velocity",
                value: max_velocity,
            });
        }
        Ok(Self {
            dt,
            min_velocity,
            max_velocity,
        })
    }

    /// Control period.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Limit for `level` in a stack of `depth` levels.
    pub fn limit_for(&self, level: usize, depth: usize) -> f64 {
        if depth <= 1 {
            return self.min_velocity;
        }
        let step = (self.max_velocity - self.min_velocity) / (depth - 1) as f64;
        self.min_velocity + level as f64 * step
    }

    /// Install the schedule on every level of `stack` and on its bounds.
    ///
    /// Existing [`VelocityLimits`] are retuned; levels without one get a new
    /// one appended to their constraint list.
    pub fn apply(&self, stack: &AutoStack) -> Result<()> {
        let depth = stack.depth();
        for (i, level) in stack.levels().iter().enumerate() {
            let limit = self.limit_for(i, depth);
            let mut task = level
                .try_borrow_mut()
                .map_err(|_| HqpError::InvariantViolation(format!("level {i} is borrowed during velocity allocation")))?;
            if !self.retune(task.constraints(), limit)? {
                let added = VelocityLimits::new(limit, self.dt, task.x_size())?;
                task.constraints_mut().push(constraint::shared(added));
            }
            debug!(level = i, task = %task.id(), limit, "velocity limit allocated");
        }

        let bounds = stack.bounds();
        let bounds = bounds.borrow();
        if let Some(children) = bounds.children() {
            self.retune(children, self.max_velocity)?;
        }
        Ok(())
    }

    /// Set every velocity limit in `list` to `limit`; `true` if any was found.
    fn retune(&self, list: &[ConstraintPtr], limit: f64) -> Result<bool> {
        let mut found = false;
        for c in list {
            let mut c = c
                .try_borrow_mut()
                .map_err(|_| HqpError::InvariantViolation("constraint is borrowed during velocity allocation".into()))?;
            let Some(v) = c.as_velocity_limits_mut() else {
                continue;
            };
            if v.dt() != self.dt {
                return Err(HqpError::InvalidParameter { name: "dt", value: v.dt() });
            }
            if v.velocity_limits() != limit {
                warn!(previous = v.velocity_limits(), limit, "velocity limit overridden");
            }
            v.set_velocity_limits(limit)?;
            v.update(&DVector::zeros(v.x_size()))?;
            found = true;
        }
        Ok(found)
    }
}
