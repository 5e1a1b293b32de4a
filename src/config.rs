/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Configuration surface of the hierarchical solver.
//!
//! Every per-level knob can be given once for the whole stack
//! ([`LevelSetting::Global`]) or once per level ([`LevelSetting::PerLevel`]).
//! [`HqpConfig::resolve`] expands the settings against the stack depth.

use crate::backend::BackEndKind;
use crate::error::{HqpError, Result};

/// Default minimum singular-value ratio below which a direction is treated
/// as numerically unreachable.
pub const DEFAULT_MIN_SV_RATIO: f64 = 0.05;

/// Default diagonal regularisation added to every sub-QP Hessian by the back end.
pub const DEFAULT_EPS_REGULARISATION: f64 = 1e-9;

// ─── LevelSetting ────────────────────────────────────────────────────────────

/// A value broadcast to every level, or one value per level.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LevelSetting<T> {
    /// Same value for every level.
    Global(T),
    /// One value per level; length must equal the stack depth.
    PerLevel(Vec<T>),
}

impl<T: Clone> LevelSetting<T> {
    /// Expand to exactly `depth` values.
    pub fn expand(&self, depth: usize, name: &str) -> Result<Vec<T>> {
        match self {
            Self::Global(v) => Ok(vec![v.clone(); depth]),
            Self::PerLevel(values) if values.len() == depth => Ok(values.clone()),
            Self::PerLevel(values) => Err(HqpError::dimension(name, depth, values.len())),
        }
    }
}

// ─── LevelConfig ─────────────────────────────────────────────────────────────

/// Resolved settings of a single priority level.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelConfig {
    /// Ratio to the largest singular value under which a direction is
    /// regularized and counted as nullspace.  In `(0, 1]`.
    pub min_sv_ratio: f64,
    /// Deflate `b` and inflate small singular values of the projected matrix.
    pub perform_ab_regularization: bool,
    /// Add curvature along the near-zero directions of the projected Hessian.
    pub perform_selective_nullspace_regularization: bool,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            min_sv_ratio: DEFAULT_MIN_SV_RATIO,
            perform_ab_regularization: true,
            perform_selective_nullspace_regularization: true,
        }
    }
}

/// Validate a singular-value ratio.
pub fn check_sv_ratio(ratio: f64) -> Result<f64> {
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(ratio)
    } else {
        Err(HqpError::InvalidParameter {
            name: "min_singular_value_ratio",
            value: ratio,
        })
    }
}

// ─── HqpConfig ───────────────────────────────────────────────────────────────

/// Configuration of a [`crate::nhqp::NullspaceHqp`] solver.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HqpConfig {
    /// Minimum singular-value ratio.  Default: global 0.05.
    pub min_singular_value_ratio: LevelSetting<f64>,
    /// A/b regularization toggle.  Default: global `true`.
    pub perform_ab_regularization: LevelSetting<bool>,
    /// Selective nullspace regularization toggle.  Default: global `true`.
    pub perform_selective_nullspace_regularization: LevelSetting<bool>,
    /// Diagonal term the back end adds to every Hessian.  Default: 1e-9.
    pub eps_regularisation: f64,
    /// Which registered back end solves the sub-QPs.  Default: `Clarabel`.
    pub back_end: BackEndKind,
}

impl Default for HqpConfig {
    fn default() -> Self {
        Self {
            min_singular_value_ratio: LevelSetting::Global(DEFAULT_MIN_SV_RATIO),
            perform_ab_regularization: LevelSetting::Global(true),
            perform_selective_nullspace_regularization: LevelSetting::Global(true),
            eps_regularisation: DEFAULT_EPS_REGULARISATION,
            back_end: BackEndKind::Clarabel,
        }
    }
}

impl HqpConfig {
    /// Configuration with both regularizations switched off everywhere.
    ///
    /// Appropriate for a single level holding a full-rank objective.
    pub fn unregularized() -> Self {
        Self {
            perform_ab_regularization: LevelSetting::Global(false),
            perform_selective_nullspace_regularization: LevelSetting::Global(false),
            ..Self::default()
        }
    }

    /// Expand every setting to `depth` levels and validate ranges.
    pub fn resolve(&self, depth: usize) -> Result<Vec<LevelConfig>> {
        if self.eps_regularisation.is_nan() || self.eps_regularisation < 0.0 {
            return Err(HqpError::InvalidParameter {
                name: "eps_regularisation",
                value: self.eps_regularisation,
            });
        }
        let ratios = self
            .min_singular_value_ratio
            .expand(depth, "min_singular_value_ratio")?;
        let ab = self
            .perform_ab_regularization
            .expand(depth, "perform_ab_regularization")?;
        let selective = self
            .perform_selective_nullspace_regularization
            .expand(depth, "perform_selective_nullspace_regularization")?;

        ratios
            .into_iter()
            .zip(ab)
            .zip(selective)
            .map(|((ratio, ab), sel)| {
                Ok(LevelConfig {
                    min_sv_ratio: check_sv_ratio(ratio)?,
                    perform_ab_regularization: ab,
                    perform_selective_nullspace_regularization: sel,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_to_defaults() {
        let levels = HqpConfig::default().resolve(3).unwrap();
        assert_eq!(levels.len(), 3);
        assert!(levels.iter().all(|l| *l == LevelConfig::default()));
    }

    #[test]
    fn per_level_length_must_match_depth() {
        let cfg = HqpConfig {
            min_singular_value_ratio: LevelSetting::PerLevel(vec![0.1, 0.2]),
            ..HqpConfig::default()
        };
        let err = cfg.resolve(3).unwrap_err();
        assert!(matches!(err, HqpError::DimensionMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn ratio_out_of_range_is_rejected() {
        assert!(check_sv_ratio(0.0).is_err());
        assert!(check_sv_ratio(1.5).is_err());
        assert!(check_sv_ratio(f64::NAN).is_err());
        assert_eq!(check_sv_ratio(1.0).unwrap(), 1.0);
    }

    #[test]
    fn unregularized_turns_both_flags_off() {
        let levels = HqpConfig::unregularized().resolve(1).unwrap();
        assert!(!levels[0].perform_ab_regularization);
        assert!(!levels[0].perform_selective_nullspace_regularization);
        assert_eq!(levels[0].min_sv_ratio, DEFAULT_MIN_SV_RATIO);
    }
}
