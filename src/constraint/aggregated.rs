/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Union of several constraints exposed as a single payload.
//!
//! Children are stored as shared handles and are never removed.  The
//! aggregated payload is rebuilt from the children on every `update()`.

use nalgebra::{DMatrix, DVector};

use super::{compose_id, reaches, update_shared, Constraint, ConstraintCore, ConstraintPayload, ConstraintPtr};
use crate::error::{HqpError, Result};
use crate::linalg::{vstack, vstack_vectors};

/// How children are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AggregationMode {
    /// Rows of every child are stacked into one inequality.  Bounds become
    /// identity rows and equalities become rows with `lower = upper`.
    #[default]
    Stacked,
    /// Every child is a box bound; the result is their intersection.
    PureBounds,
}

/// Ordered, append-only collection of constraints.
#[derive(Debug)]
pub struct ConstraintAggregated {
    core: ConstraintCore,
    children: Vec<ConstraintPtr>,
    mode: AggregationMode,
}

impl ConstraintAggregated {
    /// Aggregate `children` over `x_size` variables.
    pub fn new(children: Vec<ConstraintPtr>, x_size: usize, mode: AggregationMode) -> Result<Self> {
        let id = if children.is_empty() {
            "aggregated".to_owned()
        } else {
            let ids: Vec<String> = children.iter().map(|c| c.borrow().id().to_owned()).collect();
            compose_id(ids.iter().map(String::as_str))
        };
        for child in &children {
            check_child(&*child.borrow(), x_size, mode)?;
        }
        let payload = build(&children, x_size, mode)?;
        Ok(Self {
            core: ConstraintCore::new(id, x_size, payload)?,
            children,
            mode,
        })
    }

    /// Two constraints stacked together.
    pub fn pair(first: ConstraintPtr, second: ConstraintPtr, x_size: usize) -> Result<Self> {
        Self::new(vec![first, second], x_size, AggregationMode::Stacked)
    }

    /// Aggregation mode chosen at construction.
    pub fn mode(&self) -> AggregationMode {
        self.mode
    }

    /// Append a child.  `self_address` is the allocation holding this
    /// aggregation; a child that already contains it is refused.
    pub(crate) fn push(&mut self, child: ConstraintPtr, self_address: usize) -> Result<()> {
        if reaches(&child, self_address) {
            return Err(HqpError::InvariantViolation(format!(
                "adding a constraint to '{}' would make it contain itself",
                self.core.id()
            )));
        }
        check_child(&*child.borrow(), self.core.x_size(), self.mode)?;
        self.children.push(child);
        let payload = build(&self.children, self.core.x_size(), self.mode)?;
        self.core.refresh(payload)
    }
}

fn check_child(child: &dyn Constraint, x_size: usize, mode: AggregationMode) -> Result<()> {
    if child.x_size() != x_size {
        return Err(HqpError::dimension(
            format!("constraint '{}' decision size", child.id()),
            x_size,
            child.x_size(),
        ));
    }
    if mode == AggregationMode::PureBounds && !child.is_bound() {
        return Err(HqpError::InvariantViolation(format!(
            "'{}' is {:?}; a pure-bound aggregation accepts bounds only",
            child.id(),
            child.kind()
        )));
    }
    Ok(())
}

fn build(children: &[ConstraintPtr], x_size: usize, mode: AggregationMode) -> Result<ConstraintPayload> {
    match mode {
        AggregationMode::Stacked => {
            let rows: Vec<_> = children.iter().map(|c| c.borrow().payload().to_rows()).collect();
            let a_blocks: Vec<&DMatrix<f64>> = rows.iter().map(|(a, _, _)| a).collect();
            let lower: Vec<&DVector<f64>> = rows.iter().map(|(_, l, _)| l).collect();
            let upper: Vec<&DVector<f64>> = rows.iter().map(|(_, _, u)| u).collect();
            Ok(ConstraintPayload::Inequality {
                a: vstack(&a_blocks, x_size, "aggregated constraint rows")?,
                lower: vstack_vectors(&lower),
                upper: vstack_vectors(&upper),
            })
        }
        AggregationMode::PureBounds => {
            let mut lower = DVector::from_element(x_size, f64::NEG_INFINITY);
            let mut upper = DVector::from_element(x_size, f64::INFINITY);
            for child in children {
                let child = child.borrow();
                match child.payload() {
                    ConstraintPayload::Bound { lower: l, upper: u } => {
                        lower.zip_apply(l, |acc, v| *acc = acc.max(v));
                        upper.zip_apply(u, |acc, v| *acc = acc.min(v));
                    }
                    other => {
                        return Err(HqpError::InvariantViolation(format!(
                            "'{}' turned into {:?} inside a pure-bound aggregation",
                            child.id(),
                            other.kind()
                        )))
                    }
                }
            }
            Ok(ConstraintPayload::Bound { lower, upper })
        }
    }
}

impl Constraint for ConstraintAggregated {
    fn core(&self) -> &ConstraintCore {
        &self.core
    }

    fn update(&mut self, state: &DVector<f64>) -> Result<()> {
        for child in &self.children {
            update_shared(child, state)?;
        }
        let payload = build(&self.children, self.core.x_size(), self.mode)?;
        self.core.refresh(payload)
    }

    fn children(&self) -> Option<&[ConstraintPtr]> {
        Some(&self.children)
    }
}
