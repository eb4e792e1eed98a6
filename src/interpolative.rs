//! Rank-revealing row interpolative decomposition.
//!
//! Given a sample matrix `S` with `m` rows, the decomposition selects `k`
//! pivot rows and a coefficient matrix `T` such that every remaining row is
//! reproduced, within tolerance, as a linear combination of the pivot rows:
//! `S ≈ U S(pivots, :)` with `U` the `m x k` operator that is the identity
//! on the pivot rows and `T` on the rest. The rank `k` is discovered from
//! the data, not fixed in advance.
//!
//! The pivots and coefficients come out of a column-pivoted QR of the
//! transposed sample: if `Sᵀ P = Q R` with `R = [R₁₁ R₁₂]`, the pivot rows
//! are the first `k` entries of `P` and `T` solves `R₁₁ T = R₁₂`.

use crate::pivoted_qr::PivotedQrDecomp;
use crate::types::{HssScalar, Result};
use itertools::Itertools;
use ndarray::{s, Array2, ArrayView2, Axis};
use ndarray_linalg::{Diag, SolveTriangular, UPLO};

/// Interpolative basis operator produced by [`interpolative_rows`].
///
/// Stores the reconstruction transform together with the sorted pivot list,
/// which is all a consumer needs to expand rank-sized data back to the full
/// row set or to project full rows down onto the basis.
#[derive(Clone, Debug)]
pub struct IdBasis<A> {
    /// Coefficients of the non-pivot rows, `rank x (rows - rank)`.
    coeff: Array2<A>,
    /// Selected row indices, sorted ascending.
    pivots: Vec<usize>,
    /// The complementary rows, in pivot-order of the decomposition.
    rest: Vec<usize>,
}

impl<A: HssScalar> IdBasis<A> {
    pub fn empty() -> Self {
        IdBasis {
            coeff: Array2::zeros((0, 0)),
            pivots: Vec::new(),
            rest: Vec::new(),
        }
    }

    /// Number of rows of the operator (the row count of the decomposed
    /// sample).
    pub fn rows(&self) -> usize {
        self.pivots.len() + self.rest.len()
    }

    /// Discovered rank.
    pub fn rank(&self) -> usize {
        self.pivots.len()
    }

    pub fn pivots(&self) -> &[usize] {
        &self.pivots
    }

    /// Expand rank-sized data to the full row set: `U · y`.
    pub fn apply(&self, y: ArrayView2<A>) -> Array2<A> {
        assert_eq!(y.nrows(), self.rank());
        let mut out = Array2::<A>::zeros((self.rows(), y.ncols()));
        for (j, &p) in self.pivots.iter().enumerate() {
            out.row_mut(p).assign(&y.row(j));
        }
        if !self.rest.is_empty() {
            let expanded = self.coeff.t().dot(&y);
            for (i, &r) in self.rest.iter().enumerate() {
                out.row_mut(r).assign(&expanded.row(i));
            }
        }
        out
    }

    /// Project full rows onto the basis: `Uᴴ · x`.
    pub fn apply_conj(&self, x: ArrayView2<A>) -> Array2<A> {
        assert_eq!(x.nrows(), self.rows());
        let projected = x.select(Axis(0), &self.pivots);
        if self.rest.is_empty() {
            return projected;
        }
        let rest = x.select(Axis(0), &self.rest);
        projected + self.coeff.map(|v| v.conj()).dot(&rest)
    }

    /// Dense form of the operator, mainly for testing.
    pub fn to_mat(&self) -> Array2<A> {
        let eye = Array2::<A>::eye(self.rank());
        self.apply(eye.view())
    }
}

/// Compute a row interpolative decomposition of `sample` with the rank
/// determined by `rel_tol`/`abs_tol` on the pivoted-QR diagonal and capped
/// at `max_rank`.
pub fn interpolative_rows<A: HssScalar>(
    sample: ArrayView2<A>,
    rel_tol: f64,
    abs_tol: f64,
    max_rank: usize,
) -> Result<IdBasis<A>> {
    let m = sample.nrows();
    if m == 0 {
        return Ok(IdBasis::empty());
    }

    let qr = sample.t().pivoted_qr()?;
    let rank = qr.truncation_rank(rel_tol, abs_tol, max_rank);

    let coeff_unordered = if rank == 0 || rank == m {
        Array2::<A>::zeros((rank, m - rank))
    } else {
        let head = qr.r.slice(s![0..rank, 0..rank]).to_owned();
        let mut coeff = Array2::<A>::zeros((rank, m - rank));
        for (index, col) in qr.r.slice(s![0..rank, rank..m]).axis_iter(Axis(1)).enumerate() {
            let solved = head.solve_triangular(UPLO::Upper, Diag::NonUnit, &col.to_owned())?;
            coeff.column_mut(index).assign(&solved);
        }
        coeff
    };

    // Sort the selected rows; the coefficient rows move with their pivots.
    let order: Vec<usize> = (0..rank).sorted_by_key(|&j| qr.ind[j]).collect();
    let pivots: Vec<usize> = order.iter().map(|&j| qr.ind[j]).collect();
    let mut coeff = Array2::<A>::zeros((rank, m - rank));
    for (row, &j) in order.iter().enumerate() {
        coeff.row_mut(row).assign(&coeff_unordered.row(j));
    }
    let rest = qr.ind[rank..].to_vec();

    Ok(IdBasis {
        coeff,
        pivots,
        rest,
    })
}
