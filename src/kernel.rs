//! Matrix access interfaces consumed by the compression engine.
//!
//! The engine never forms the matrix it compresses. It only needs two
//! capabilities: multiplying the matrix (and its conjugate transpose) by a
//! block of test vectors, and evaluating arbitrary sub-blocks of entries.
//! Anything providing both can be compressed; [`DenseKernel`] adapts an
//! in-memory matrix to the interface by direct reads.

use crate::types::HssScalar;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

/// Capability interface for the matrix under compression.
///
/// Implementations must be `Sync`: entry extraction is called from
/// concurrent node tasks during the compression recursion.
pub trait MatrixKernel<A: HssScalar>: Sync {
    fn rows(&self) -> usize;

    fn cols(&self) -> usize;

    /// Multiply by blocks of test vectors: write `A · rr` into `sr` and
    /// `Aᴴ · rc` into `sc`.
    ///
    /// The test blocks are passed mutably: a kernel serving as its own
    /// source of test vectors (see
    /// [`user_defined_random`](crate::options::HssOptions::user_defined_random))
    /// fills `rr`/`rc` before producing the samples; all other kernels treat
    /// them as read-only inputs.
    fn multiply(
        &self,
        rr: ArrayViewMut2<A>,
        rc: ArrayViewMut2<A>,
        sr: ArrayViewMut2<A>,
        sc: ArrayViewMut2<A>,
    );

    /// Evaluate the exact sub-matrix at the given row and column indices.
    fn extract(&self, rows: &[usize], cols: &[usize]) -> Array2<A>;
}

/// Adapter presenting an in-memory dense matrix through [`MatrixKernel`].
pub struct DenseKernel<'a, A> {
    mat: ArrayView2<'a, A>,
}

impl<'a, A: HssScalar> DenseKernel<'a, A> {
    pub fn new(mat: ArrayView2<'a, A>) -> Self {
        DenseKernel { mat }
    }
}

impl<'a, A: HssScalar> MatrixKernel<A> for DenseKernel<'a, A> {
    fn rows(&self) -> usize {
        self.mat.nrows()
    }

    fn cols(&self) -> usize {
        self.mat.ncols()
    }

    fn multiply(
        &self,
        rr: ArrayViewMut2<A>,
        rc: ArrayViewMut2<A>,
        mut sr: ArrayViewMut2<A>,
        mut sc: ArrayViewMut2<A>,
    ) {
        sr.assign(&self.mat.dot(&rr));
        let adjoint = self.mat.t().map(|item| item.conj());
        sc.assign(&adjoint.dot(&rc));
    }

    fn extract(&self, rows: &[usize], cols: &[usize]) -> Array2<A> {
        Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
            self.mat[[rows[i], cols[j]]]
        })
    }
}
