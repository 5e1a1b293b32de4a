/*
 * This file is part of hqp-core.
 *
 * hqp-core is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Lesser General Public License as published by the Free
 * Software Foundation, either version 2.1 of the License, or (at your option)
 * any later version. See <https://www.gnu.org/licenses/> for the full text.
 */

//! Dense numeric helpers: row stacking, block-diagonal assembly, the PSD
//! square root used for level weights, and a sorted, rank-revealing SVD.
//!
//! The SVD wrapper always exposes a *full* right-singular basis: when the
//! input has fewer rows than columns it is padded with zero rows, so every
//! column of `V` pairs with a singular value (the padded ones are exactly
//! zero and land in the nullspace).

use core::cmp::Ordering;

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{HqpError, Result};

// ─── stacking ────────────────────────────────────────────────────────────────

/// Stack matrices vertically.  Every block must have `cols` columns.
pub fn vstack(blocks: &[&DMatrix<f64>], cols: usize, context: &str) -> Result<DMatrix<f64>> {
    let rows = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let mut offset = 0;
    for block in blocks {
        if block.ncols() != cols {
            return Err(HqpError::dimension(context, cols, block.ncols()));
        }
        out.rows_mut(offset, block.nrows()).copy_from(*block);
        offset += block.nrows();
    }
    Ok(out)
}

/// Concatenate vectors end to end.
pub fn vstack_vectors(blocks: &[&DVector<f64>]) -> DVector<f64> {
    let len = blocks.iter().map(|b| b.len()).sum();
    let mut out = DVector::zeros(len);
    let mut offset = 0;
    for block in blocks {
        out.rows_mut(offset, block.len()).copy_from(*block);
        offset += block.len();
    }
    out
}

/// Assemble square blocks along the diagonal; off-diagonal blocks are zero.
pub fn block_diag(blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let size = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::zeros(size, size);
    let mut offset = 0;
    for block in blocks {
        let n = block.nrows();
        out.view_mut((offset, offset), (n, n)).copy_from(*block);
        offset += n;
    }
    out
}

/// Symmetric square root `S` of a PSD matrix, `S·S = W`.
///
/// Negative eigenvalues (round-off on a PSD input) are clamped to zero.
pub fn psd_sqrt(w: &DMatrix<f64>) -> DMatrix<f64> {
    if w.is_identity(0.0) {
        return w.clone();
    }
    let eig = SymmetricEigen::new(w.clone());
    let roots = eig.eigenvalues.map(|l| l.max(0.0).sqrt());
    &eig.eigenvectors * DMatrix::from_diagonal(&roots) * eig.eigenvectors.transpose()
}

// ─── SvdDecomposition ────────────────────────────────────────────────────────

/// Singular value decomposition with descending singular values and a full
/// right-singular basis.
#[derive(Clone, Debug)]
pub struct SvdDecomposition {
    /// One singular value per input column, descending.
    pub singular_values: DVector<f64>,
    /// Left singular vectors restricted to the input rows (`m × n`).
    ///
    /// Column `i` pairs with `singular_values[i]`.  For strictly positive
    /// singular values it is a unit vector in the range of the input.
    pub u: DMatrix<f64>,
    /// Right singular vectors (`n × n`, orthonormal columns).
    pub v: DMatrix<f64>,
}

impl SvdDecomposition {
    /// Decompose `a`.  Returns `None` when the iteration fails to converge
    /// or when `a` has no columns.
    pub fn new(a: &DMatrix<f64>) -> Option<Self> {
        let (m, n) = a.shape();
        if n == 0 {
            return None;
        }

        let padded = if m < n {
            let mut p = DMatrix::zeros(n, n);
            p.rows_mut(0, m).copy_from(a);
            p
        } else {
            a.clone()
        };

        let svd = padded.try_svd(true, true, f64::EPSILON, 0)?;
        let u = svd.u?;
        let v_t = svd.v_t?;
        let sv = svd.singular_values;

        let mut order: Vec<usize> = (0..sv.len()).collect();
        order.sort_by(|&i, &j| sv[j].partial_cmp(&sv[i]).unwrap_or(Ordering::Equal));

        let mut singular_values = DVector::zeros(n);
        let mut u_sorted = DMatrix::zeros(m, n);
        let mut v_sorted = DMatrix::zeros(n, n);
        for (dst, &src) in order.iter().enumerate() {
            singular_values[dst] = sv[src];
            for r in 0..m {
                u_sorted[(r, dst)] = u[(r, src)];
            }
            for r in 0..n {
                v_sorted[(r, dst)] = v_t[(src, r)];
            }
        }

        Some(Self {
            singular_values,
            u: u_sorted,
            v: v_sorted,
        })
    }

    /// Largest singular value (0 for an all-zero input).
    pub fn sigma_max(&self) -> f64 {
        self.singular_values.get(0).copied().unwrap_or(0.0)
    }

    /// Number of singular values at or below `threshold`.
    ///
    /// Ties count as nullspace.
    pub fn nullspace_dimension(&self, threshold: f64) -> usize {
        self.singular_values.iter().filter(|&&s| s <= threshold).count()
    }

    /// Orthonormal basis of the trailing `dim` right-singular directions.
    pub fn nullspace_basis(&self, dim: usize) -> DMatrix<f64> {
        let n = self.v.ncols();
        let dim = dim.min(n);
        self.v.columns(n - dim, dim).into_owned()
    }
}
