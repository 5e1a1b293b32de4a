/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Interior-point back end over the `clarabel` crate.
//!
//! Clarabel solves
//!
//! ```text
//! minimise    ½·xᵀPx + qᵀx
//! subject to  A·x + s = b,   s ∈ K
//! ```
//!
//! A [`QpProblem`] row `l ≤ a·x ≤ u` becomes `a·x ≤ u` and `−a·x ≤ −l` in
//! the nonnegative cone, or a single zero-cone row when `l = u`.  Infinite
//! sides are dropped and box bounds are appended as unit rows.  Problems
//! with no rows left skip the solver and take the Cholesky step directly.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

use super::{BackEnd, BackEndKind, QpProblem};
use crate::error::BackEndError;

/// Rows whose norm is below this are checked for consistency and dropped.
const ZERO_ROW: f64 = 1e-12;
/// Relative gap under which two finite sides are treated as an equality.
const EQUALITY_GAP: f64 = 1e-12;
/// Slack tolerated on crossed sides and on dropped zero rows.
const FEASIBILITY_TOL: f64 = 1e-9;
/// Interior-point iteration cap.
const MAX_ITERATIONS: u32 = 200;
/// Entries below this are left out of the sparse operands.
const SPARSE_ZERO: f64 = 1e-15;

/// `Clarabel` back end, registered by default.
#[derive(Clone, Debug)]
pub struct ClarabelQp {
    eps_regularisation: f64,
}

impl ClarabelQp {
    /// Back end adding `eps_regularisation·I` to every Hessian.
    pub fn new(eps_regularisation: f64) -> Self {
        Self { eps_regularisation }
    }
}

impl BackEnd for ClarabelQp {
    fn kind(&self) -> BackEndKind {
        BackEndKind::Clarabel
    }

    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, BackEndError> {
        problem.check()?;
        let n = problem.variables();
        if n == 0 {
            return Ok(DVector::zeros(0));
        }

        let mut h = &problem.h + DMatrix::identity(n, n) * self.eps_regularisation;
        h = (&h + h.transpose()) * 0.5;

        let rows = ConicRows::split(problem)?;
        if rows.is_empty() {
            return h
                .cholesky()
                .map(|c| c.solve(&(-&problem.g)))
                .ok_or_else(|| BackEndError::NumericalFailure("Hessian is not positive definite".into()));
        }

        let (a, b, cones) = rows.assemble(n);
        let settings = DefaultSettingsBuilder::default()
            .max_iter(MAX_ITERATIONS)
            .verbose(false)
            .build()
            .map_err(|e| BackEndError::NumericalFailure(format!("{e:?}")))?;
        let mut solver = DefaultSolver::new(
            &dense_to_csc_upper_tri(&h),
            problem.g.as_slice(),
            &dense_to_csc(&a),
            &b,
            &cones,
            settings,
        )
        .map_err(|e| BackEndError::NumericalFailure(format!("{e:?}")))?;
        solver.solve();

        let solution = &solver.solution;
        trace!(status = ?solution.status, rows = b.len(), "clarabel finished");
        match &solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(DVector::from_column_slice(&solution.x)),
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => Err(BackEndError::Infeasible),
            SolverStatus::MaxIterations => Err(BackEndError::IterationLimit(MAX_ITERATIONS as usize)),
            other => Err(BackEndError::NumericalFailure(format!("clarabel stopped with {other:?}"))),
        }
    }

    fn eps_regularisation(&self) -> f64 {
        self.eps_regularisation
    }

    fn set_eps_regularisation(&mut self, eps: f64) {
        self.eps_regularisation = eps;
    }
}

// ─── cone rows ───────────────────────────────────────────────────────────────

/// Rows in Clarabel form: `a·x = b` for equalities, `a·x ≤ b` otherwise.
struct ConicRows {
    equalities: Vec<(DVector<f64>, f64)>,
    inequalities: Vec<(DVector<f64>, f64)>,
}

impl ConicRows {
    fn split(problem: &QpProblem) -> Result<Self, BackEndError> {
        let n = problem.variables();
        let mut rows = Self {
            equalities: Vec::new(),
            inequalities: Vec::new(),
        };
        for r in 0..problem.constraints() {
            let a = problem.a_ineq.row(r).transpose();
            rows.push(a, problem.lower_ineq[r], problem.upper_ineq[r])?;
        }
        if problem.has_bounds() {
            for i in 0..n {
                let mut e = DVector::zeros(n);
                e[i] = 1.0;
                rows.push(e, problem.lower_bound[i], problem.upper_bound[i])?;
            }
        }
        Ok(rows)
    }

    fn push(&mut self, a: DVector<f64>, lo: f64, hi: f64) -> Result<(), BackEndError> {
        if lo - hi > FEASIBILITY_TOL * (1.0 + lo.abs().max(hi.abs())) {
            return Err(BackEndError::Infeasible);
        }
        if a.norm() <= ZERO_ROW {
            return if lo > FEASIBILITY_TOL || hi < -FEASIBILITY_TOL {
                Err(BackEndError::Infeasible)
            } else {
                Ok(())
            };
        }
        if lo.is_finite() && hi.is_finite() && hi - lo <= EQUALITY_GAP * (1.0 + lo.abs().max(hi.abs())) {
            self.equalities.push((a, 0.5 * (lo + hi)));
            return Ok(());
        }
        if lo.is_finite() {
            self.inequalities.push((-&a, -lo));
        }
        if hi.is_finite() {
            self.inequalities.push((a, hi));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.equalities.is_empty() && self.inequalities.is_empty()
    }

    /// Stack equalities first, then inequalities, with the matching cones.
    fn assemble(&self, n: usize) -> (DMatrix<f64>, Vec<f64>, Vec<SupportedConeT<f64>>) {
        let m = self.equalities.len() + self.inequalities.len();
        let mut a = DMatrix::zeros(m, n);
        let mut b = Vec::with_capacity(m);
        for (r, (row, rhs)) in self.equalities.iter().chain(&self.inequalities).enumerate() {
            a.set_row(r, &row.transpose());
            b.push(*rhs);
        }
        let mut cones = Vec::with_capacity(2);
        if !self.equalities.is_empty() {
            cones.push(ZeroConeT(self.equalities.len()));
        }
        if !self.inequalities.is_empty() {
            cones.push(NonnegativeConeT(self.inequalities.len()));
        }
        (a, b, cones)
    }
}

// ─── sparse conversion ───────────────────────────────────────────────────────

fn dense_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > SPARSE_ZERO {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Upper triangle of a square symmetric matrix, as Clarabel expects `P`.
fn dense_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let n = m.ncols();
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    for j in 0..n {
        for i in 0..=j {
            let v = m[(i, j)];
            if v.abs() > SPARSE_ZERO {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }
    CscMatrix::new(n, n, colptr, rowval, nzval)
}
