/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Joint velocity limits expressed as a box on the per-cycle increment.
//!
//! With the decision vector being a position increment over one control
//! period `dt`, a velocity limit `q̇_max` becomes
//! `−q̇_max·dt ≤ x ≤ q̇_max·dt`.

use nalgebra::DVector;

use super::{Constraint, ConstraintCore, ConstraintPayload};
use crate::error::{HqpError, Result};

/// Symmetric velocity box on every decision variable.
#[derive(Clone, Debug)]
pub struct VelocityLimits {
    core: ConstraintCore,
    velocity_limit: f64,
    dt: f64,
}

impl VelocityLimits {
    /// Limits of `velocity_limit` (≥ 0) over a period `dt` (> 0) for `x_size` variables.
    pub fn new(velocity_limit: f64, dt: f64, x_size: usize) -> Result<Self> {
        check_limit(velocity_limit)?;
        if !(dt > 0.0) {
            return Err(HqpError::InvalidParameter { name: "dt", value: dt });
        }
        let core = ConstraintCore::new("velocity_limits", x_size, box_payload(velocity_limit, dt, x_size))?;
        Ok(Self {
            core,
            velocity_limit,
            dt,
        })
    }

    /// Change the velocity limit; the bounds follow on the next `update()`.
    pub fn set_velocity_limits(&mut self, velocity_limit: f64) -> Result<()> {
        check_limit(velocity_limit)?;
        self.velocity_limit = velocity_limit;
        Ok(())
    }

    /// Current velocity limit.
    pub fn velocity_limits(&self) -> f64 {
        self.velocity_limit
    }

    /// Control period.
    pub fn dt(&self) -> f64 {
        self.dt
    }
}

fn check_limit(velocity_limit: f64) -> Result<()> {
    if velocity_limit >= 0.0 {
        Ok(())
    } else {
        Err(HqpError::InvalidParameter {
            name: "velocity_limit",
            value: velocity_limit,
        })
    }
}

fn box_payload(velocity_limit: f64, dt: f64, x_size: usize) -> ConstraintPayload {
    let step = velocity_limit * dt;
    ConstraintPayload::Bound {
        lower: DVector::from_element(x_size, -step),
        upper: DVector::from_element(x_size, step),
    }
}

impl Constraint for VelocityLimits {
    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn update(&mut self, _state: &DVector<f64>) -> Result<()> {
        let payload = box_payload(self.velocity_limit, self.dt, self.core.x_size());
        self.core.refresh(payload)
    }

    fn as_velocity_limits(&self) -> Option<&VelocityLimits> {
        Some(self)
    }

    fn as_velocity_limits_mut(&mut self) -> Option<&mut VelocityLimits> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VEL_LIM: f64 = 20.0;
    const DT: f64 = 0.001;

    #[test]
    fn sizes_are_correct() {
        let limits = VelocityLimits::new(VEL_LIM, DT, 7).unwrap();
        assert!(limits.is_bound());
        assert_eq!(limits.payload().rows(), 7);
    }

    #[test]
    fn bounds_are_correct() {
        let limits = VelocityLimits::new(VEL_LIM, DT, 3).unwrap();
        match limits.payload() {
            ConstraintPayload::Bound { lower, upper } => {
                assert!((lower[0] + DT * VEL_LIM).abs() < 1e-15);
                assert!((upper[0] - DT * VEL_LIM).abs() < 1e-15);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn new_limit_applies_on_update() {
        let mut limits = VelocityLimits::new(VEL_LIM, DT, 2).unwrap();
        limits.set_velocity_limits(5.0).unwrap();
        limits.update(&DVector::zeros(2)).unwrap();
        match limits.payload() {
            ConstraintPayload::Bound { upper, .. } => assert!((upper[1] - 5.0 * DT).abs() < 1e-15),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn non_positive_dt_is_rejected() {
        assert!(VelocityLimits::new(VEL_LIM, 0.0, 2).is_err());
        assert!(VelocityLimits::new(-1.0, DT, 2).is_err());
    }
}
