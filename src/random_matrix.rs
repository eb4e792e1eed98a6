//! Generation of random matrices for various types.

use ndarray::{Array2, ArrayViewMut2};
use ndarray_linalg::{JobSvd, Lapack, Scalar, SVDDCInto};
use num::complex::Complex;
use num::traits::cast::cast;
use num::Float;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

/// Distribution used for the random test columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomDistribution {
    /// Standard normal per entry (real and imaginary parts independently).
    Normal,
    /// Uniform on `[0, 1)` per entry.
    Uniform,
}

pub trait RandomMatrix
where
    Self: Scalar + Lapack,
{
    /// Fill `mat` with random entries drawn from `dist`.
    fn fill_random<R: Rng + ?Sized>(
        mat: ArrayViewMut2<Self>,
        dist: RandomDistribution,
        rng: &mut R,
    );

    /// Generate a random Gaussian matrix.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Tuple (rows, cols) specifying the number of rows and columns.
    /// * `rng`: The random number generator to use.
    fn random_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self> {
        let mut mat = Array2::<Self>::zeros(dimension);
        Self::fill_random(mat.view_mut(), RandomDistribution::Normal, rng);
        mat
    }

    /// Generate a random matrix with orthogonal rows or columns.
    ///
    /// This function creates a normally distributed (m, n) random matrix,
    /// orthogonalizes it and returns the resulting orthogonal matrix.
    ///
    /// If m > n then the returned matrix has orthogonal columns. If n > m
    /// the returned matrix has orthogonalized rows.
    fn random_orthogonal_matrix<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self> {
        let mut m = dimension.0;
        let mut n = dimension.1;

        // Always ensure that we form the QR decomp for a long and skinny matrix
        if dimension.1 > dimension.0 {
            std::mem::swap(&mut m, &mut n);
        }

        let mat = Self::random_gaussian((m, n), rng);

        let (u, _, _) = mat
            .svddc_into(JobSvd::Some)
            .expect("`random_orthogonal_matrix`: SVD computation failed.");

        // If we originally had more columns than rows, conjugate transpose again.
        if dimension.1 > dimension.0 {
            u.unwrap().t().map(|item| item.conj())
        } else {
            u.unwrap()
        }
    }

    /// Generate a random approximate low-rank matrix.
    ///
    /// This function generates a random approximate low-rank matrix
    /// with singular values logarithmically distributed between
    /// `sigma_max` and `sigma_min`.
    fn random_approximate_low_rank_matrix<R: Rng>(
        dimension: (usize, usize),
        sigma_max: f64,
        sigma_min: f64,
        rng: &mut R,
    ) -> Array2<Self> {
        use ndarray::Array;

        assert!(
            sigma_min < sigma_max,
            "`sigma_min` must be smaller than `sigma_max`"
        );
        assert!(sigma_min > 0.0, "`sigma_min` must be positive.");

        let min_dim = std::cmp::min(dimension.0, dimension.1);

        let u = Self::random_orthogonal_matrix((dimension.0, min_dim), rng);
        let vt = Self::random_orthogonal_matrix((min_dim, dimension.1), rng);
        let singvals = Array::geomspace(sigma_min, sigma_max, min_dim)
            .unwrap()
            .map(|&item| cast::<f64, Self>(item).unwrap());
        let sigma = Array2::from_diag(&singvals);
        u.dot(&sigma.dot(&vt))
    }
}

impl RandomMatrix for f64 {
    fn fill_random<R: Rng + ?Sized>(
        mat: ArrayViewMut2<f64>,
        dist: RandomDistribution,
        rng: &mut R,
    ) {
        fill_random_real::<f64, R>(mat, dist, rng)
    }
}

impl RandomMatrix for f32 {
    fn fill_random<R: Rng + ?Sized>(
        mat: ArrayViewMut2<f32>,
        dist: RandomDistribution,
        rng: &mut R,
    ) {
        fill_random_real::<f32, R>(mat, dist, rng)
    }
}

impl RandomMatrix for Complex<f64> {
    fn fill_random<R: Rng + ?Sized>(
        mat: ArrayViewMut2<Complex<f64>>,
        dist: RandomDistribution,
        rng: &mut R,
    ) {
        fill_random_complex::<f64, R>(mat, dist, rng)
    }
}

impl RandomMatrix for Complex<f32> {
    fn fill_random<R: Rng + ?Sized>(
        mat: ArrayViewMut2<Complex<f32>>,
        dist: RandomDistribution,
        rng: &mut R,
    ) {
        fill_random_complex::<f32, R>(mat, dist, rng)
    }
}

fn fill_random_real<T: Float, R: Rng + ?Sized>(
    mut mat: ArrayViewMut2<T>,
    dist: RandomDistribution,
    rng: &mut R,
) {
    match dist {
        RandomDistribution::Normal => {
            let normal = Normal::new(0.0, 1.0).unwrap();
            mat.map_inplace(|item| *item = cast::<f64, T>(normal.sample(rng)).unwrap());
        }
        RandomDistribution::Uniform => {
            let uniform = Uniform::new(0.0, 1.0);
            mat.map_inplace(|item| *item = cast::<f64, T>(uniform.sample(rng)).unwrap());
        }
    }
}

fn fill_random_complex<T: Float, R: Rng + ?Sized>(
    mut mat: ArrayViewMut2<Complex<T>>,
    dist: RandomDistribution,
    rng: &mut R,
) {
    match dist {
        RandomDistribution::Normal => {
            let normal = Normal::new(0.0, 1.0).unwrap();
            mat.map_inplace(|item| {
                let re = cast::<f64, T>(normal.sample(rng)).unwrap();
                let im = cast::<f64, T>(normal.sample(rng)).unwrap();
                *item = Complex::new(re, im);
            });
        }
        RandomDistribution::Uniform => {
            let uniform = Uniform::new(0.0, 1.0);
            mat.map_inplace(|item| {
                let re = cast::<f64, T>(uniform.sample(rng)).unwrap();
                let im = cast::<f64, T>(uniform.sample(rng)).unwrap();
                *item = Complex::new(re, im);
            });
        }
    }
}
