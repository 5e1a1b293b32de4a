/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! # hqp-core
//!
//! Prioritized task stacks for whole-body control, solved by nullspace
//! projection.
//!
//! ---
//!
//! ## Strict priorities without weights
//!
//! A controller usually wants several things at once: keep balance, reach a
//! target, stay near a posture.  Weighting them against each other trades a
//! little balance for a little reach.  A **hierarchy** does not trade: level
//! `k` is optimised only inside the set of solutions that are already optimal
//! for levels `0 … k−1`.
//!
//! Each level is a weighted least-squares objective `‖A·x − b‖²_W + cᵀx`
//! subject to linear constraints.  The solver walks the levels from the top,
//! solves a small QP over the freedom that remains, and keeps a basis of the
//! directions the level left untouched.  Rank-deficient levels are damped
//! with singular-value thresholds so a near-singular task cannot produce
//! huge steps.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! Tasks ──sum──▶ TaskAggregated ──then──▶ AutoStack ◀──with_bound── Constraints
//!                                            │
//!                                     update(state)
//!                                            │
//!                                            ▼
//!                              NullspaceHqp::solve  ──▶  x
//!                                            │
//!                                    BackEnd (Clarabel)
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`task`] | [`Task`], [`GenericTask`], [`TaskAggregated`], [`AffineTask`] | Objectives and same-priority sums |
//! | [`constraint`] | [`Constraint`], [`GenericConstraint`], [`ConstraintAggregated`], [`VelocityLimits`] | Bounds, inequalities, equalities |
//! | [`stack`] | [`AutoStack`] | Ordered levels plus global bounds |
//! | [`nhqp`] | [`NullspaceHqp`], [`LevelReport`] | The hierarchical solver |
//! | [`backend`] | [`BackEnd`], [`BackEndKind`], [`BackEndRegistry`], [`ClarabelQp`] | Dense QP back ends |
//! | [`allocation`] | [`VelocityAllocation`] | Per-level velocity-limit schedule |
//! | [`affine`] | [`AffineHelper`] | `y = M·x + q` variable maps |
//! | [`config`] | [`HqpConfig`], [`LevelSetting`] | Solver settings, global or per level |
//! | [`linalg`] | [`SvdDecomposition`] | SVD and matrix assembly helpers |
//! | [`error`] | [`HqpError`], [`BackEndError`] | Error types |
//!
//! ## Example
//!
//! ```
//! use hqp_core::{AutoStack, GenericTask, HqpConfig, NullspaceHqp, task};
//! use nalgebra::{DMatrix, DVector};
//!
//! let reach = task::shared(GenericTask::new("reach", DMatrix::identity(3, 3), DVector::from_element(3, 1.0))?);
//! let mut stack = AutoStack::new(reach)?;
//! stack.update(&DVector::zeros(3))?;
//!
//! let mut solver = NullspaceHqp::new(&stack, HqpConfig::unregularized())?;
//! let x = solver.solve()?;
//! assert!((x[0] - 1.0).abs() < 1e-6);
//! # Ok::<(), hqp_core::HqpError>(())
//! ```
//!
//! ## Threading
//!
//! Tasks and constraints are shared through `Rc<RefCell<_>>` handles and are
//! meant to be driven from one control thread.  Re-entrant access is reported
//! as [`HqpError::InvariantViolation`], never as a panic.
//!
//! ## Features
//!
//! Enable `serde` to serialize [`HqpConfig`], [`LevelReport`] and the other
//! plain configuration and diagnostic types.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod affine;
pub mod allocation;
pub mod backend;
pub mod config;
pub mod constraint;
pub mod error;
pub mod linalg;
pub mod nhqp;
pub mod stack;
pub mod task;

pub use affine::AffineHelper;
pub use allocation::VelocityAllocation;
pub use backend::{BackEnd, BackEndKind, BackEndRegistry, BackEndSetup, ClarabelQp, QpProblem};
pub use config::{HqpConfig, LevelConfig, LevelSetting};
pub use constraint::{
    AffineConstraint, AggregationMode, Constraint, ConstraintAggregated, ConstraintKind, ConstraintPayload,
    ConstraintPtr, GenericConstraint, VelocityLimits,
};
pub use error::{BackEndError, HqpError, Result};
pub use linalg::SvdDecomposition;
pub use nhqp::{LevelReport, NullspaceHqp};
pub use stack::{sum, AutoStack};
pub use task::{AffineTask, GenericTask, HessianType, Task, TaskAggregated, TaskPtr};
