//! Small shared helpers: relative-difference norms and sample buffer growth.

use ndarray::{s, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{c32, c64, Norm, OperationNorm, Scalar};

pub trait RelDiff {
    type A: Scalar;

    /// Return the relative Frobenius norm difference of `first` and `second`.
    fn rel_diff_fro(
        first: ArrayView2<Self::A>,
        second: ArrayView2<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;

    /// Return the relative l2 vector norm difference of `first` and `second`.
    fn rel_diff_l2(
        first: ArrayView1<Self::A>,
        second: ArrayView1<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;
}

macro_rules! rel_diff_impl {
    ($scalar:ty) => {
        impl RelDiff for $scalar {
            type A = $scalar;
            fn rel_diff_fro(
                first: ArrayView2<Self::A>,
                second: ArrayView2<Self::A>,
            ) -> <<Self as RelDiff>::A as Scalar>::Real {
                let diff = first.to_owned() - &second;
                diff.opnorm_fro().unwrap() / second.opnorm_fro().unwrap()
            }

            fn rel_diff_l2(
                first: ArrayView1<Self::A>,
                second: ArrayView1<Self::A>,
            ) -> <<Self as RelDiff>::A as Scalar>::Real {
                let diff = first.to_owned() - &second;
                diff.norm_l2() / second.norm_l2()
            }
        }
    };
}

rel_diff_impl!(f32);
rel_diff_impl!(f64);
rel_diff_impl!(c32);
rel_diff_impl!(c64);

/// Widen a sample or test matrix to `ncols` columns, keeping existing columns
/// and zero-filling the new ones.
pub(crate) fn grow_cols<A: Scalar>(mat: &mut Array2<A>, ncols: usize) {
    let old = mat.ncols();
    if old >= ncols {
        return;
    }
    let mut next = Array2::<A>::zeros((mat.nrows(), ncols));
    next.slice_mut(s![.., 0..old]).assign(mat);
    *mat = next;
}
