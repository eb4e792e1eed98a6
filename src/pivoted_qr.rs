//! Column-pivoted QR by calling into the corresponding Lapack routine
//! (`?geqp3`). Pivoted QR is not provided by ndarray-linalg, making this
//! module necessary. The pivot ordering makes the factorization
//! rank-revealing: the magnitudes on the diagonal of R are non-increasing,
//! so a numerical rank can be read off against a tolerance.

use crate::types::{HssError, Result, Scalar};
use ndarray::{Array2, ArrayBase, Data, Ix2, ShapeBuilder};
use ndarray_linalg::Lapack;
use num::ToPrimitive;

/// Result of a column-pivoted QR decomposition `A P = Q R`.
pub struct PivotedQr<A> {
    /// Matrix with orthogonal columns, `m x k` with `k = min(m, n)`.
    pub q: Array2<A>,
    /// Upper triangular factor, `k x n`, diagonal non-increasing in magnitude.
    pub r: Array2<A>,
    /// Pivot vector: column `j` of `Q R` is column `ind[j]` of `A`.
    pub ind: Vec<usize>,
}

impl<A: Scalar> PivotedQr<A> {
    /// Numerical rank of the factored matrix: the number of leading diagonal
    /// entries of R at least as large as `max(abs_tol, rel_tol * |r_00|)`,
    /// capped at `max_rank`.
    pub fn truncation_rank(&self, rel_tol: f64, abs_tol: f64, max_rank: usize) -> usize {
        let k = self.r.nrows().min(max_rank);
        if k == 0 {
            return 0;
        }
        let largest = self.r[[0, 0]].abs().to_f64().unwrap();
        if largest == 0.0 {
            return 0;
        }
        let threshold = abs_tol.max(rel_tol * largest);
        for i in 0..k {
            if self.r[[i, i]].abs().to_f64().unwrap() < threshold {
                return i;
            }
        }
        k
    }
}

/// Decomposition entry point, implemented for all two-dimensional ndarray
/// containers over a supported scalar.
pub trait PivotedQrDecomp {
    type Elem: Scalar + Lapack;

    fn pivoted_qr(&self) -> Result<PivotedQr<Self::Elem>>;
}

impl<A, S> PivotedQrDecomp for ArrayBase<S, Ix2>
where
    A: PivotedQrScalar,
    S: Data<Elem = A>,
{
    type Elem = A;

    fn pivoted_qr(&self) -> Result<PivotedQr<A>> {
        let m = self.nrows();
        let n = self.ncols();

        // geqp3 wants Fortran ordering; stage a copy.
        let mut mat_fortran = Array2::<A>::zeros((m, n).f());
        mat_fortran.assign(self);
        A::pivoted_qr_impl(mat_fortran)
    }
}

pub trait PivotedQrScalar: imp::PivotedQrImpl {}

impl<A: imp::PivotedQrImpl> PivotedQrScalar for A {}

mod imp {
    use super::{HssError, PivotedQr, Result};
    use ndarray::{s, Array1, Array2};
    use lax::qr::QWorkImpl;
    use ndarray_linalg::layout::AllocatedArray;
    use ndarray_linalg::{IntoTriangular, Lapack, MatrixLayout, Scalar};
    use num::traits::{ToPrimitive, Zero};

    pub trait PivotedQrImpl
    where
        Self: Scalar + Lapack,
    {
        fn pivoted_qr_impl(mat: Array2<Self>) -> Result<PivotedQr<Self>>;
        fn pivoted_qr_decomp(
            mat: &mut [Self],
            layout: MatrixLayout,
        ) -> std::result::Result<(Array1<Self>, Vec<usize>), i32>;
    }

    macro_rules! impl_qr_pivot {

    (@real, $scalar:ty, $qrf:path) => {
        impl_qr_pivot!(@body, $scalar, $qrf, );
    };
    (@complex, $scalar:ty, $qrf:path) => {
        impl_qr_pivot!(@body, $scalar, $qrf, rwork);
    };
    (@body, $scalar:ty, $qrf:path, $($rwork_ident:ident),*) => {
            impl PivotedQrImpl for $scalar {
                fn pivoted_qr_impl(mut mat: Array2<Self>) -> Result<PivotedQr<$scalar>> {
                    let m = mat.nrows();
                    let n = mat.ncols();
                    let k = m.min(n);

                    let layout = match mat.layout() {
                        Ok(layout) => layout,
                        Err(_) => return Err(HssError::LayoutError),
                    };

                    let result =
                        Self::pivoted_qr_decomp(mat.as_slice_memory_order_mut().unwrap(), layout);
                    let (mut tau, jpvt) = match result {
                        Ok(res) => res,
                        Err(info) => return Err(HssError::PivotedQrError(info)),
                    };

                    let mut r_mat = Array2::<$scalar>::zeros((k, n));
                    r_mat.assign(&mat.slice(s![0..k, ..]));
                    let r_mat = r_mat.into_triangular(ndarray_linalg::UPLO::Upper);

                    let mut q_work = match lax::qr::QWork::<$scalar>::new(layout) {
                        Ok(w) => w,
                        Err(_) => return Err(HssError::PivotedQrError(-1)),
                    };
                    match q_work.calc(
                        mat.as_slice_memory_order_mut().unwrap(),
                        tau.as_slice_memory_order_mut().unwrap(),
                    ) {
                        Ok(_) => (),
                        Err(_) => return Err(HssError::PivotedQrError(-1)),
                    }

                    let mut q_mat = Array2::<$scalar>::zeros((m, k));
                    q_mat.assign(&mat.slice(s![.., 0..k]));

                    Ok(PivotedQr {
                        q: q_mat,
                        r: r_mat,
                        ind: jpvt,
                    })
                }

                fn pivoted_qr_decomp(
                    mat: &mut [Self],
                    layout: MatrixLayout,
                ) -> std::result::Result<(Array1<Self>, Vec<usize>), i32> {
                    let m = layout.lda();
                    let n = layout.len();
                    let k = m.min(n);
                    let mut tau = Array1::<$scalar>::zeros(k as usize);

                    let mut info = 0;
                    let mut work_size = [Self::zero()];
                    let mut jpvt = vec![0i32; n as usize];

                    $(
                    let mut $rwork_ident = Array1::<Self::Real>::zeros(2 * (n as usize));
                    )*

                    unsafe {
                        $qrf(
                            m,
                            n,
                            mat,
                            m,
                            &mut jpvt,
                            tau.as_slice_memory_order_mut().unwrap(),
                            &mut work_size,
                            -1,
                            $($rwork_ident.as_slice_memory_order_mut().unwrap(),)*
                            &mut info,
                        );
                    }

                    if info != 0 {
                        return Err(info);
                    }

                    let lwork = work_size[0].to_usize().unwrap();
                    let mut work = Array1::<$scalar>::zeros(lwork);
                    unsafe {
                        $qrf(
                            m,
                            n,
                            mat,
                            m,
                            &mut jpvt,
                            tau.as_slice_memory_order_mut().unwrap(),
                            work.as_slice_memory_order_mut().unwrap(),
                            lwork as i32,
                            $($rwork_ident.as_slice_memory_order_mut().unwrap(),)*
                            &mut info,
                        );
                    }

                    // Lapack counts pivots from one.
                    let jpvt = jpvt.iter().map(|&item| (item - 1) as usize).collect();

                    match info {
                        0 => Ok((tau, jpvt)),
                        _ => Err(info),
                    }
                }
            }
        };
    }
    impl_qr_pivot!(@real, f64, lapack::dgeqp3);
    impl_qr_pivot!(@real, f32, lapack::sgeqp3);
    impl_qr_pivot!(@complex, num::complex::Complex<f64>, lapack::zgeqp3);
    impl_qr_pivot!(@complex, num::complex::Complex<f32>, lapack::cgeqp3);
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::random_matrix::RandomMatrix;
    use ndarray_linalg::{Norm, Scalar};

    macro_rules! pivoted_qr_tests {

    ($($name:ident: $scalar:ty, $dim:expr,)*) => {

        $(

        #[test]
        fn $name() {
            let m = $dim.0;
            let n = $dim.1;

            let mut rng = rand::thread_rng();
            let mat = <$scalar>::random_approximate_low_rank_matrix((m, n), 1.0, 1E-5, &mut rng);

            let qr_result = mat.pivoted_qr().unwrap();

            let prod = qr_result.q.dot(&qr_result.r);

            // Check orthogonality of Q.T x Q

            let qtq = qr_result.q.t().map(|&item| item.conj()).dot(&qr_result.q);

            for ((i, j), &val) in qtq.indexed_iter() {
                if i == j {
                    let rel_diff = (val - 1.0).abs();
                    assert!(rel_diff < 1E-6);
                } else {
                    assert!(val.abs() < 1E-6);
                }
            }

            // Check that the product is correct.

            for (col_index, col) in prod.axis_iter(ndarray::Axis(1)).enumerate() {
                let perm_index = qr_result.ind[col_index];
                let diff = col.to_owned() - mat.index_axis(ndarray::Axis(1), perm_index);
                let rel_diff = diff.norm_l2() / mat.index_axis(ndarray::Axis(1), perm_index).norm_l2();

                assert!(rel_diff < 1E-6);
            }
        }
                )*
            };
        }

    pivoted_qr_tests! {
        pivoted_qr_test_thin_f64: f64, (100, 50),
        pivoted_qr_test_thin_f32: f32, (100, 50),
        pivoted_qr_test_thin_c64: ndarray_linalg::c64, (100, 50),
        pivoted_qr_test_thin_c32: ndarray_linalg::c32, (100, 50),
        pivoted_qr_test_thick_f64: f64, (50, 100),
        pivoted_qr_test_thick_f32: f32, (50, 100),
        pivoted_qr_test_thick_c64: ndarray_linalg::c64, (50, 100),
        pivoted_qr_test_thick_c32: ndarray_linalg::c32, (50, 100),
    }

    #[test]
    fn truncation_rank_detects_exact_rank() {
        use ndarray::Array2;

        let mut rng = rand::thread_rng();
        let left = f64::random_gaussian((60, 4), &mut rng);
        let right = f64::random_gaussian((4, 40), &mut rng);
        let mat: Array2<f64> = left.dot(&right);

        let qr = mat.pivoted_qr().unwrap();
        assert_eq!(qr.truncation_rank(1E-10, 0.0, 40), 4);
        assert_eq!(qr.truncation_rank(1E-10, 0.0, 3), 3);
    }

    #[test]
    fn truncation_rank_of_zero_matrix_is_zero() {
        use ndarray::Array2;

        let mat = Array2::<f64>::zeros((10, 6));
        let qr = mat.pivoted_qr().unwrap();
        assert_eq!(qr.truncation_rank(1E-10, 0.0, 6), 0);
    }
}
