/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! QP back ends and their registry.
//!
//! The hierarchical solver hands every level to a [`BackEnd`] as a dense
//! [`QpProblem`]:
//!
//! ```text
//! minimise    ½·xᵀHx + gᵀx
//! subject to  lower_ineq ≤ A_ineq·x ≤ upper_ineq
//!             lower_bound ≤ x ≤ upper_bound        (optional)
//! ```
//!
//! Back ends are picked by [`BackEndKind`] through a [`BackEndRegistry`] of
//! statically linked factories.  Only `Clarabel` ships with the crate; the
//! other names resolve once a caller registers a factory for them.

pub mod clarabel_qp;

use core::fmt;
use core::str::FromStr;

use hashbrown::HashMap;
use nalgebra::{DMatrix, DVector};

use crate::error::{BackEndError, HqpError, Result};
use crate::task::HessianType;

pub use clarabel_qp::ClarabelQp;

// ─── BackEndKind ─────────────────────────────────────────────────────────────

/// Names of the QP back ends the solver knows about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BackEndKind {
    /// `qpOASES`
    #[cfg_attr(feature = "serde", serde(rename = "qpOASES"))]
    QpOases,
    /// `OSQP`
    #[cfg_attr(feature = "serde", serde(rename = "OSQP"))]
    Osqp,
    /// `GLPK`
    #[cfg_attr(feature = "serde", serde(rename = "GLPK"))]
    Glpk,
    /// `eiQuadProg`
    #[cfg_attr(feature = "serde", serde(rename = "eiQuadProg"))]
    EiQuadProg,
    /// `ODYS`
    #[cfg_attr(feature = "serde", serde(rename = "ODYS"))]
    Odys,
    /// `qpSWIFT`
    #[cfg_attr(feature = "serde", serde(rename = "qpSWIFT"))]
    QpSwift,
    /// `proxQP`
    #[cfg_attr(feature = "serde", serde(rename = "proxQP"))]
    ProxQp,
    /// `Clarabel`, built in.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "Clarabel"))]
    Clarabel,
}

impl BackEndKind {
    /// Every kind, in declaration order.
    pub const ALL: [BackEndKind; 8] = [
        Self::QpOases,
        Self::Osqp,
        Self::Glpk,
        Self::EiQuadProg,
        Self::Odys,
        Self::QpSwift,
        Self::ProxQp,
        Self::Clarabel,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::QpOases => "qpOASES",
            Self::Osqp => "OSQP",
            Self::Glpk => "GLPK",
            Self::EiQuadProg => "eiQuadProg",
            Self::Odys => "ODYS",
            Self::QpSwift => "qpSWIFT",
            Self::ProxQp => "proxQP",
            Self::Clarabel => "Clarabel",
        }
    }
}

impl fmt::Display for BackEndKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackEndKind {
    type Err = HqpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| HqpError::BackEndUnavailable(s.to_owned()))
    }
}

// ─── QpProblem ───────────────────────────────────────────────────────────────

/// One dense QP handed to a back end.
#[derive(Clone, Debug, PartialEq)]
pub struct QpProblem {
    /// Hessian, `n × n`.
    pub h: DMatrix<f64>,
    /// Gradient, `n`.
    pub g: DVector<f64>,
    /// Inequality matrix, `r × n`.
    pub a_ineq: DMatrix<f64>,
    /// Inequality lower side, `r`; `-inf` for none.
    pub lower_ineq: DVector<f64>,
    /// Inequality upper side, `r`; `+inf` for none.
    pub upper_ineq: DVector<f64>,
    /// Variable lower bounds, `n`, or empty for none.
    pub lower_bound: DVector<f64>,
    /// Variable upper bounds, `n`, or empty for none.
    pub upper_bound: DVector<f64>,
}

impl QpProblem {
    /// `½·xᵀHx + gᵀx` with no constraints.
    pub fn unconstrained(h: DMatrix<f64>, g: DVector<f64>) -> Self {
        let n = g.len();
        Self {
            h,
            g,
            a_ineq: DMatrix::zeros(0, n),
            lower_ineq: DVector::zeros(0),
            upper_ineq: DVector::zeros(0),
            lower_bound: DVector::zeros(0),
            upper_bound: DVector::zeros(0),
        }
    }

    /// Number of variables.
    pub fn variables(&self) -> usize {
        self.g.len()
    }

    /// Number of inequality rows.
    pub fn constraints(&self) -> usize {
        self.a_ineq.nrows()
    }

    /// `true` when variable bounds are present.
    pub fn has_bounds(&self) -> bool {
        !self.lower_bound.is_empty()
    }

    /// Verify that every operand agrees with `g.len()`.
    pub fn check(&self) -> core::result::Result<(), BackEndError> {
        let n = self.variables();
        let mismatch = |context, expected, actual| {
            if expected == actual {
                Ok(())
            } else {
                Err(BackEndError::DimensionMismatch {
                    context,
                    expected,
                    actual,
                })
            }
        };
        mismatch("H rows", n, self.h.nrows())?;
        mismatch("H columns", n, self.h.ncols())?;
        mismatch("A_ineq columns", n, self.a_ineq.ncols())?;
        mismatch("lower_ineq", self.a_ineq.nrows(), self.lower_ineq.len())?;
        mismatch("upper_ineq", self.a_ineq.nrows(), self.upper_ineq.len())?;
        if self.has_bounds() || !self.upper_bound.is_empty() {
            mismatch("lower_bound", n, self.lower_bound.len())?;
            mismatch("upper_bound", n, self.upper_bound.len())?;
        }
        Ok(())
    }
}

// ─── BackEnd ─────────────────────────────────────────────────────────────────

/// Sizes and hints a back end is created with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackEndSetup {
    /// Number of variables of the level.
    pub variables: usize,
    /// Number of inequality rows of the level.
    pub constraints: usize,
    /// Hessian shape hint.
    pub hessian_type: HessianType,
    /// Diagonal term added to `H` before solving.
    pub eps_regularisation: f64,
}

/// A dense QP solver.
pub trait BackEnd: fmt::Debug {
    /// Which registered name this back end answers to.
    fn kind(&self) -> BackEndKind;

    /// Solve `problem`.  Must not keep partial results on failure.
    fn solve(&mut self, problem: &QpProblem) -> core::result::Result<DVector<f64>, BackEndError>;

    /// Diagonal term added to `H`.
    fn eps_regularisation(&self) -> f64;

    /// Change the diagonal term added to `H`.
    fn set_eps_regularisation(&mut self, eps: f64);
}

/// Builds a back end for one level.
pub type BackEndFactory = fn(&BackEndSetup) -> Box<dyn BackEnd>;

// ─── BackEndRegistry ─────────────────────────────────────────────────────────

/// Map from [`BackEndKind`] to factory.
#[derive(Clone)]
pub struct BackEndRegistry {
    factories: HashMap<BackEndKind, BackEndFactory>,
}

impl fmt::Debug for BackEndRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.available()).finish()
    }
}

impl BackEndRegistry {
    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register(&mut self, kind: BackEndKind, factory: BackEndFactory) {
        self.factories.insert(kind, factory);
    }

    /// `true` when `kind` can be created.
    pub fn is_available(&self, kind: BackEndKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds, in declaration order.
    pub fn available(&self) -> Vec<BackEndKind> {
        BackEndKind::ALL
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }

    /// Instantiate `kind`.
    pub fn create(&self, kind: BackEndKind, setup: &BackEndSetup) -> Result<Box<dyn BackEnd>> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| HqpError::BackEndUnavailable(kind.name().to_owned()))?;
        Ok(factory(setup))
    }

    /// Instantiate a back end by canonical name.
    pub fn create_by_name(&self, name: &str, setup: &BackEndSetup) -> Result<Box<dyn BackEnd>> {
        self.create(name.parse()?, setup)
    }
}

impl Default for BackEndRegistry {
    /// Registry holding the built-in `Clarabel` back end.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(BackEndKind::Clarabel, clarabel_factory);
        registry
    }
}

fn clarabel_factory(setup: &BackEndSetup) -> Box<dyn BackEnd> {
    Box::new(ClarabelQp::new(setup.eps_regularisation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> BackEndSetup {
        BackEndSetup {
            variables: 2,
            constraints: 0,
            hessian_type: HessianType::Unknown,
            eps_regularisation: 0.0,
        }
    }

    #[test]
    fn names_round_trip() {
        for kind in BackEndKind::ALL {
            assert_eq!(kind.to_string().parse::<BackEndKind>().unwrap(), kind);
        }
        assert!(matches!("gurobi".parse::<BackEndKind>(), Err(HqpError::BackEndUnavailable(_))));
    }

    #[test]
    fn default_registry_only_has_clarabel() {
        let registry = BackEndRegistry::default();
        assert_eq!(registry.available(), vec![BackEndKind::Clarabel]);
        assert_eq!(BackEndKind::default(), BackEndKind::Clarabel);
        let err = registry.create(BackEndKind::Osqp, &setup()).unwrap_err();
        assert_eq!(err, HqpError::BackEndUnavailable("OSQP".into()));
    }

    #[test]
    fn create_by_name_resolves() {
        let registry = BackEndRegistry::default();
        let be = registry.create_by_name("Clarabel", &setup()).unwrap();
        assert_eq!(be.kind(), BackEndKind::Clarabel);
        assert!(matches!(
            registry.create_by_name("eiQuadProg", &setup()),
            Err(HqpError::BackEndUnavailable(_))
        ));
        assert!(registry.create_by_name("nope", &setup()).is_err());
    }

    #[test]
    fn problem_check_catches_short_bounds() {
        let mut qp = QpProblem::unconstrained(DMatrix::identity(2, 2), DVector::zeros(2));
        assert!(qp.check().is_ok());
        qp.lower_bound = DVector::zeros(1);
        qp.upper_bound = DVector::zeros(2);
        assert!(matches!(
            qp.check(),
            Err(BackEndError::DimensionMismatch { context: "lower_bound", .. })
        ));
    }
}
