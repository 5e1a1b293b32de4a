/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Hierarchical QP by nullspace projection.
//!
//! Each priority level optimises only over the freedom the levels above it
//! left, so the sub-problems shrink down the hierarchy.
//!
//! # Algorithm
//!
//! Start with `N₋₁ = Iₙ`, `sol₋₁ = 0`.  For level `k` with task
//! `(A_k, b_k, W_k, c_k)` and `S = W_k^{1/2}`:
//!
//! **Step 1, projection:** `A_N = S·A_k·N_{k-1}`,
//! `b₀ = S·(b_k − A_k·sol_{k-1})`.
//!
//! **Step 2, rank:** `A_N = UΣVᵀ` with `σ` descending;
//! `thr = ratio_k·σ_max`.  Directions with `σ ≤ thr` form the nullspace.
//!
//! **Step 3, A/b regularization (optional):** along every direction with
//! `σᵢ < thr`, `b₀` loses `(1 − σᵢ/thr)` of its `uᵢ` component and `σᵢ` is
//! raised to `thr`.
//!
//! **Step 4, cost:** `H = A_NᵀA_N (+ thr²·V_null·V_nullᵀ)`,
//! `g = −A_Nᵀb₀ + N_{k-1}ᵀc_k`.
//!
//! **Step 5, constraints:** the stack bounds and the level's own
//! constraints, written over `x_k` through `x = sol_{k-1} + N_{k-1}·x_k`.
//! Box bounds reach level 0 as simple bounds.
//!
//! **Step 6, compose:** `sol_k = sol_{k-1} + N_{k-1}·x_k`,
//! `N_k = N_{k-1}·V_null`.
//!
//! A failing level aborts the cascade; nothing observable changes until
//! every level has succeeded.

use core::fmt;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::backend::{BackEnd, BackEndKind, BackEndRegistry, BackEndSetup, QpProblem};
use crate::config::{check_sv_ratio, HqpConfig, LevelConfig};
use crate::constraint::{ConstraintPayload, ConstraintPtr};
use crate::error::{BackEndError, HqpError, Result};
use crate::linalg::{psd_sqrt, vstack, vstack_vectors, SvdDecomposition};
use crate::stack::AutoStack;
use crate::task::{Task, TaskPtr};

// ─── LevelReport ─────────────────────────────────────────────────────────────

/// What happened at one level during the last successful solve.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelReport {
    /// Priority index, 0 = highest.
    pub level: usize,
    /// Id of the level's task.
    pub task_id: String,
    /// Free variables available to this level.
    pub variables: usize,
    /// Task rows.
    pub rows: usize,
    /// Inequality rows handed to the back end.
    pub constraints: usize,
    /// Singular values of the projected task matrix, descending.
    pub singular_values: Vec<f64>,
    /// Singular-value threshold.
    pub threshold: f64,
    /// Free variables left for the levels below.
    pub nullspace_dimension: usize,
    /// Accumulated nullspace basis `N_k`, `n × nullspace_dimension`, with
    /// orthonormal columns.
    pub nullspace_basis: DMatrix<f64>,
}

impl LevelReport {
    /// Rank of the projected task matrix at this level's threshold.
    pub fn rank(&self) -> usize {
        self.variables - self.nullspace_dimension
    }
}

// ─── NullspaceHqp ────────────────────────────────────────────────────────────

#[derive(Default)]
struct LevelWorkspace {
    back_end: Option<Box<dyn BackEnd>>,
    shape: (usize, usize),
    nullspace_dimension: Option<usize>,
}

/// Nullspace-projection hierarchical QP solver.
pub struct NullspaceHqp {
    levels: Vec<TaskPtr>,
    bounds: Option<ConstraintPtr>,
    x_size: usize,
    config: Vec<LevelConfig>,
    eps_regularisation: f64,
    back_end_kind: BackEndKind,
    registry: BackEndRegistry,
    workspace: Vec<LevelWorkspace>,
    reports: Vec<LevelReport>,
    solution: DVector<f64>,
}

impl fmt::Debug for NullspaceHqp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullspaceHqp")
            .field("depth", &self.levels.len())
            .field("x_size", &self.x_size)
            .field("config", &self.config)
            .field("back_end", &self.back_end_kind)
            .finish_non_exhaustive()
    }
}

impl NullspaceHqp {
    /// Solver for `stack` with the built-in back ends.
    pub fn new(stack: &AutoStack, config: HqpConfig) -> Result<Self> {
        Self::with_registry(stack, config, BackEndRegistry::default())
    }

    /// Solver for `stack` resolving back ends through `registry`.
    pub fn with_registry(stack: &AutoStack, config: HqpConfig, registry: BackEndRegistry) -> Result<Self> {
        Self::from_levels(stack.levels().to_vec(), Some(stack.bounds()), config, registry)
    }

    /// Solver over explicit levels and optional global constraints.
    pub fn from_levels(
        levels: Vec<TaskPtr>,
        bounds: Option<ConstraintPtr>,
        config: HqpConfig,
        registry: BackEndRegistry,
    ) -> Result<Self> {
        let first = levels
            .first()
            .ok_or_else(|| HqpError::InvariantViolation("a hierarchy needs at least one level".into()))?;
        let x_size = first.borrow().x_size();
        for level in &levels {
            let t = level.borrow();
            if t.x_size() != x_size {
                return Err(HqpError::dimension(format!("level '{}' decision size", t.id()), x_size, t.x_size()));
            }
        }
        if let Some(b) = &bounds {
            let b = b.borrow();
            if b.x_size() != x_size {
                return Err(HqpError::dimension(format!("bounds '{}' decision size", b.id()), x_size, b.x_size()));
            }
        }
        if !registry.is_available(config.back_end) {
            return Err(HqpError::BackEndUnavailable(config.back_end.name().to_owned()));
        }

        let depth = levels.len();
        let resolved = config.resolve(depth)?;
        Ok(Self {
            levels,
            bounds,
            x_size,
            config: resolved,
            eps_regularisation: config.eps_regularisation,
            back_end_kind: config.back_end,
            registry,
            workspace: (0..depth).map(|_| LevelWorkspace::default()).collect(),
            reports: Vec::new(),
            solution: DVector::zeros(x_size),
        })
    }

    /// Number of priority levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Decision-vector size.
    pub fn x_size(&self) -> usize {
        self.x_size
    }

    /// Back end solving the sub-problems.
    pub fn back_end_kind(&self) -> BackEndKind {
        self.back_end_kind
    }

    /// Resolved settings of `level`.
    pub fn level_config(&self, level: usize) -> Option<&LevelConfig> {
        self.config.get(level)
    }

    /// Per-level diagnostics of the last successful solve.
    pub fn reports(&self) -> &[LevelReport] {
        &self.reports
    }

    /// Last successful solution (zeros before the first solve).
    pub fn solution(&self) -> &DVector<f64> {
        &self.solution
    }

    /// Same singular-value ratio on every level.
    pub fn set_min_singular_value_ratio(&mut self, ratio: f64) -> Result<()> {
        let ratio = check_sv_ratio(ratio)?;
        for cfg in &mut self.config {
            cfg.min_sv_ratio = ratio;
        }
        Ok(())
    }

    /// One singular-value ratio per level.
    pub fn set_min_singular_value_ratios(&mut self, ratios: &[f64]) -> Result<()> {
        if ratios.len() != self.depth() {
            return Err(HqpError::dimension("min_singular_value_ratio", self.depth(), ratios.len()));
        }
        let checked = ratios.iter().map(|&r| check_sv_ratio(r)).collect::<Result<Vec<_>>>()?;
        for (cfg, ratio) in self.config.iter_mut().zip(checked) {
            cfg.min_sv_ratio = ratio;
        }
        Ok(())
    }

    /// Toggle A/b regularization on one level.
    pub fn set_perform_ab_regularization(&mut self, level: usize, enabled: bool) -> Result<()> {
        self.level_mut(level)?.perform_ab_regularization = enabled;
        Ok(())
    }

    /// Toggle A/b regularization on every level.
    pub fn set_perform_ab_regularization_all(&mut self, enabled: bool) {
        for cfg in &mut self.config {
            cfg.perform_ab_regularization = enabled;
        }
    }

    /// Toggle selective nullspace regularization on one level.
    pub fn set_perform_selective_nullspace_regularization(&mut self, level: usize, enabled: bool) -> Result<()> {
        self.level_mut(level)?.perform_selective_nullspace_regularization = enabled;
        Ok(())
    }

    /// Toggle selective nullspace regularization on every level.
    pub fn set_perform_selective_nullspace_regularization_all(&mut self, enabled: bool) {
        for cfg in &mut self.config {
            cfg.perform_selective_nullspace_regularization = enabled;
        }
    }

    /// Change the diagonal term every back end adds to its Hessian.
    pub fn set_eps_regularisation(&mut self, eps: f64) -> Result<()> {
        if eps.is_nan() || eps < 0.0 {
            return Err(HqpError::InvalidParameter {
                name: "eps_regularisation",
                value: eps,
            });
        }
        self.eps_regularisation = eps;
        for ws in &mut self.workspace {
            if let Some(be) = ws.back_end.as_mut() {
                be.set_eps_regularisation(eps);
            }
        }
        Ok(())
    }

    fn level_mut(&mut self, level: usize) -> Result<&mut LevelConfig> {
        let depth = self.config.len();
        self.config
            .get_mut(level)
            .ok_or(HqpError::LevelOutOfRange { level, depth })
    }

    /// Solve the hierarchy with the values installed by the last `update()`.
    pub fn solve(&mut self) -> Result<DVector<f64>> {
        let n = self.x_size;
        let mut null = DMatrix::identity(n, n);
        let mut sol = DVector::zeros(n);
        let mut reports = Vec::with_capacity(self.levels.len());

        let global = match &self.bounds {
            Some(b) => Some(read_payload(b)?),
            None => None,
        };

        for (k, level) in self.levels.iter().enumerate() {
            let task = level
                .try_borrow()
                .map_err(|_| HqpError::InvariantViolation(format!("level {k} is borrowed during solve")))?;
            let local = task
                .constraints()
                .iter()
                .map(read_payload)
                .collect::<Result<Vec<_>>>()?;

            let variables = null.ncols();
            if variables == 0 {
                debug!(level = k, task = %task.id(), "no free variables left");
                reports.push(LevelReport {
                    level: k,
                    task_id: task.id().to_owned(),
                    variables: 0,
                    rows: task.rows(),
                    constraints: 0,
                    singular_values: Vec::new(),
                    threshold: 0.0,
                    nullspace_dimension: 0,
                    nullspace_basis: null.clone(),
                });
                continue;
            }

            let failure = |reason: BackEndError| HqpError::SolveFailure {
                level: k,
                task_id: task.id().to_owned(),
                reason,
            };

            let level_problem = LevelProblem::build(&*task, &self.config[k], &null, &sol, global.as_ref(), &local, k == 0)?
                .ok_or_else(|| failure(BackEndError::NumericalFailure("SVD did not converge".into())))?;

            let ws = &mut self.workspace[k];
            let shape = (variables, level_problem.qp.constraints());
            if let Some(previous) = ws.nullspace_dimension {
                if previous != level_problem.nullspace_dimension {
                    warn!(
                        level = k,
                        task = %task.id(),
                        previous,
                        current = level_problem.nullspace_dimension,
                        "rank of projected task changed between solves"
                    );
                }
            }
            if ws.back_end.is_none() || ws.shape != shape {
                let setup = BackEndSetup {
                    variables,
                    constraints: shape.1,
                    hessian_type: task.hessian_type(),
                    eps_regularisation: self.eps_regularisation,
                };
                ws.back_end = Some(self.registry.create(self.back_end_kind, &setup)?);
                ws.shape = shape;
            }
            let back_end = ws
                .back_end
                .as_mut()
                .ok_or_else(|| HqpError::BackEndUnavailable(self.back_end_kind.name().to_owned()))?;

            let x_k = back_end.solve(&level_problem.qp).map_err(failure)?;
            ws.nullspace_dimension = Some(level_problem.nullspace_dimension);

            sol += &null * &x_k;
            let basis = level_problem.svd.nullspace_basis(level_problem.nullspace_dimension);
            null = &null * basis;

            debug!(
                level = k,
                task = %task.id(),
                variables,
                rows = task.rows(),
                constraints = shape.1,
                rank = variables - level_problem.nullspace_dimension,
                nullspace = level_problem.nullspace_dimension,
                "level solved"
            );
            reports.push(LevelReport {
                level: k,
                task_id: task.id().to_owned(),
                variables,
                rows: task.rows(),
                constraints: shape.1,
                singular_values: level_problem.svd.singular_values.iter().copied().collect(),
                threshold: level_problem.threshold,
                nullspace_dimension: level_problem.nullspace_dimension,
                nullspace_basis: null.clone(),
            });
        }

        self.solution = sol.clone();
        self.reports = reports;
        Ok(sol)
    }
}

fn read_payload(ptr: &ConstraintPtr) -> Result<ConstraintPayload> {
    let c = ptr
        .try_borrow()
        .map_err(|_| HqpError::InvariantViolation("constraint is borrowed during solve".into()))?;
    Ok(c.payload().clone())
}

// ─── LevelProblem ────────────────────────────────────────────────────────────

/// The reduced QP of one level plus the rank information of its task.
struct LevelProblem {
    qp: QpProblem,
    svd: SvdDecomposition,
    threshold: f64,
    nullspace_dimension: usize,
}

impl LevelProblem {
    /// `None` when the SVD fails to converge.
    fn build(
        task: &dyn Task,
        cfg: &LevelConfig,
        null: &DMatrix<f64>,
        sol: &DVector<f64>,
        global: Option<&ConstraintPayload>,
        local: &[ConstraintPayload],
        first: bool,
    ) -> Result<Option<Self>> {
        let s = psd_sqrt(task.weight());
        let mut a_n = &s * task.a() * null;
        let mut b0 = &s * (task.b() - task.a() * sol);

        let Some(svd) = SvdDecomposition::new(&a_n) else {
            return Ok(None);
        };
        let threshold = cfg.min_sv_ratio * svd.sigma_max();
        let nullspace_dimension = svd.nullspace_dimension(threshold);

        if cfg.perform_ab_regularization {
            regularize_a_b(&mut a_n, &mut b0, &svd, threshold);
        }

        let mut h = a_n.tr_mul(&a_n);
        if cfg.perform_selective_nullspace_regularization && nullspace_dimension > 0 {
            let v_null = svd.nullspace_basis(nullspace_dimension);
            h += (&v_null * v_null.transpose()) * (threshold * threshold);
        }
        let g = -a_n.tr_mul(&b0) + null.tr_mul(task.c());

        let mut qp = QpProblem::unconstrained(h, g);
        let mut rows: Vec<(DMatrix<f64>, DVector<f64>, DVector<f64>)> = Vec::new();
        match global {
            Some(ConstraintPayload::Bound { lower, upper }) if first => {
                qp.lower_bound = lower - sol;
                qp.upper_bound = upper - sol;
            }
            Some(payload) => rows.push(project(payload, null, sol)),
            None => {}
        }
        rows.extend(local.iter().map(|p| project(p, null, sol)));

        let a_blocks: Vec<&DMatrix<f64>> = rows.iter().map(|(a, _, _)| a).collect();
        let lower: Vec<&DVector<f64>> = rows.iter().map(|(_, l, _)| l).collect();
        let upper: Vec<&DVector<f64>> = rows.iter().map(|(_, _, u)| u).collect();
        qp.a_ineq = vstack(&a_blocks, null.ncols(), "level constraints")?;
        qp.lower_ineq = vstack_vectors(&lower);
        qp.upper_ineq = vstack_vectors(&upper);

        Ok(Some(Self {
            qp,
            svd,
            threshold,
            nullspace_dimension,
        }))
    }
}

/// Raise every singular value below `threshold` to it and shrink the matching
/// component of `b0` by `σ/threshold`.
fn regularize_a_b(a_n: &mut DMatrix<f64>, b0: &mut DVector<f64>, svd: &SvdDecomposition, threshold: f64) {
    for (i, &sigma) in svd.singular_values.iter().enumerate() {
        if sigma >= threshold {
            continue;
        }
        let u = svd.u.column(i);
        let v = svd.v.column(i);
        let beta = u.dot(&*b0);
        b0.axpy(-(1.0 - sigma / threshold) * beta, &u, 1.0);
        *a_n += (u * v.transpose()) * (threshold - sigma);
    }
}

/// `lower ≤ A·(sol + N·x) ≤ upper` as rows over `x`.
fn project(
    payload: &ConstraintPayload,
    null: &DMatrix<f64>,
    sol: &DVector<f64>,
) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
    let (a, lower, upper) = payload.to_rows();
    let offset = &a * sol;
    (a * null, lower - &offset, upper - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{self, GenericConstraint};
    use crate::task::{shared, GenericTask};

    fn identity_task(n: usize, target: f64) -> TaskPtr {
        shared(GenericTask::new("identity", DMatrix::identity(n, n), DVector::from_element(n, target)).unwrap())
    }

    #[test]
    fn regularization_damps_weak_directions() {
        // σ = [1, 0.01], thr = 0.1
        let mut a = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 0.01]));
        let mut b = DVector::from_vec(vec![1.0, 1.0]);
        let svd = SvdDecomposition::new(&a).unwrap();
        regularize_a_b(&mut a, &mut b, &svd, 0.1);
        assert!((a[(1, 1)].abs() - 0.1).abs() < 1e-12);
        assert!((b[1].abs() - 0.1).abs() < 1e-12);
        assert!((a[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((b[0] - 1.0).abs() < 1e-12);
        // along the weak direction the solution drops from 1/σ = 100 to σ/thr² = 1
        let y = b[1] / a[(1, 1)];
        assert!((y - 1.0).abs() < 1e-9, "y = {y}");
    }

    #[test]
    fn projection_shifts_by_previous_solution() {
        let payload = ConstraintPayload::Bound {
            lower: DVector::from_element(2, -1.0),
            upper: DVector::from_element(2, 1.0),
        };
        let null = DMatrix::from_column_slice(2, 1, &[0.0, 1.0]);
        let sol = DVector::from_vec(vec![0.5, 0.25]);
        let (a, lo, up) = project(&payload, &null, &sol);
        assert_eq!(a.shape(), (2, 1));
        assert_eq!(lo[1], -1.25);
        assert_eq!(up[0], 0.5);
    }

    #[test]
    fn empty_hierarchy_is_rejected() {
        let err = NullspaceHqp::from_levels(Vec::new(), None, HqpConfig::default(), BackEndRegistry::default())
            .unwrap_err();
        assert!(matches!(err, HqpError::InvariantViolation(_)));
    }

    #[test]
    fn unavailable_back_end_is_reported_at_construction() {
        let config = HqpConfig {
            back_end: BackEndKind::QpOases,
            ..HqpConfig::default()
        };
        let err = NullspaceHqp::from_levels(vec![identity_task(2, 0.0)], None, config, BackEndRegistry::default())
            .unwrap_err();
        assert_eq!(err, HqpError::BackEndUnavailable("qpOASES".into()));
    }

    #[test]
    fn per_level_setters_check_range() {
        let mut hqp =
            NullspaceHqp::from_levels(vec![identity_task(2, 0.0)], None, HqpConfig::default(), BackEndRegistry::default())
                .unwrap();
        assert_eq!(
            hqp.set_perform_ab_regularization(3, false),
            Err(HqpError::LevelOutOfRange { level: 3, depth: 1 })
        );
        assert!(hqp.set_min_singular_value_ratios(&[0.1, 0.2]).is_err());
        assert!(hqp.set_min_singular_value_ratio(0.0).is_err());
        hqp.set_min_singular_value_ratio(0.2).unwrap();
        assert_eq!(hqp.level_config(0).unwrap().min_sv_ratio, 0.2);
    }

    #[test]
    fn failed_solve_keeps_previous_solution() {
        let task = identity_task(1, 1.0);
        let bound = constraint::shared(
            GenericConstraint::bound("box", DVector::from_element(1, -2.0), DVector::from_element(1, 2.0)).unwrap(),
        );
        let mut hqp =
            NullspaceHqp::from_levels(vec![task], Some(bound.clone()), HqpConfig::unregularized(), BackEndRegistry::default())
                .unwrap();
        let first = hqp.solve().unwrap();
        assert!((first[0] - 1.0).abs() < 1e-6);

        // crossed bounds make level 0 infeasible
        let crossed = constraint::shared(
            GenericConstraint::bound("crossed", DVector::from_element(1, 1.0), DVector::from_element(1, -1.0)).unwrap(),
        );
        let mut broken = NullspaceHqp::from_levels(
            vec![identity_task(1, 1.0)],
            Some(crossed),
            HqpConfig::unregularized(),
            BackEndRegistry::default(),
        )
        .unwrap();
        let err = broken.solve().unwrap_err();
        assert!(matches!(err, HqpError::SolveFailure { level: 0, .. }));
        assert_eq!(broken.solution(), &DVector::<f64>::zeros(1));
        assert!(broken.reports().is_empty());
    }
}
