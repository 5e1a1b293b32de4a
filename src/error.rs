/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Error taxonomy shared by the composition model, the back ends and the
//! hierarchical solver.
//!
//! Every error is surfaced to the immediate caller of `update()` / `solve()`.
//! Nothing is retried internally; retry policy belongs to whoever drives the
//! control cycle.

use thiserror::Error;

/// Failure reported by a QP back end for a single sub-problem.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackEndError {
    /// The constraint set admits no solution.
    #[error("problem is infeasible")]
    Infeasible,

    /// The factorisation or an update step broke down numerically.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    /// The solver hit its iteration cap before converging.
    #[error("iteration limit of {0} reached")]
    IterationLimit(usize),

    /// A matrix or vector handed to the back end has the wrong shape.
    #[error("{context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Which operand was malformed.
        context: &'static str,
        /// Expected length / row / column count.
        expected: usize,
        /// Actual length / row / column count.
        actual: usize,
    },
}

/// Crate-wide error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HqpError {
    /// Decision-vector size, weight shape or constraint shape disagree.
    ///
    /// Always fatal to the operation; data is never silently truncated.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Human-readable location of the mismatch.
        context: String,
        /// Expected size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// A structural invariant of the composition model was broken
    /// (constraint list shrink, ambiguous diff, kind change, cycle).
    ///
    /// The affected stack must be rebuilt.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The requested back end is not registered.
    #[error("back end '{0}' is not available")]
    BackEndUnavailable(String),

    /// A priority level's QP failed; the whole cascade is aborted.
    #[error("level {level} ('{task_id}') failed: {reason}")]
    SolveFailure {
        /// Index of the failing level (0 = highest priority).
        level: usize,
        /// Id of the objective occupying that level.
        task_id: String,
        /// What the back end reported.
        reason: BackEndError,
    },

    /// A per-level setter addressed a level that does not exist.
    #[error("hierarchy level {level} does not exist (stack depth {depth})")]
    LevelOutOfRange {
        /// Requested level.
        level: usize,
        /// Number of levels in the stack.
        depth: usize,
    },

    /// A scalar parameter is outside its admissible range.
    #[error("invalid value {value} for {name}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
}

impl HqpError {
    /// Shorthand for building a [`HqpError::DimensionMismatch`].
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, HqpError>;
