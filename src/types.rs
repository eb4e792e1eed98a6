//! Error types and the scalar trait bound used throughout the crate.

use ndarray_linalg::error::LinalgError;
use ndarray_linalg::Lapack;
use thiserror::Error;

pub use ndarray_linalg::{c32, c64, Scalar};

use crate::pivoted_qr::PivotedQrScalar;
use crate::random_matrix::RandomMatrix;

#[derive(Error, Debug)]
pub enum HssError {
    #[error("Lapack error")]
    LinalgError(#[from] LinalgError),
    #[error("pivoted QR failed (lapack info {0})")]
    PivotedQrError(i32),
    #[error("incompatible memory layout")]
    LayoutError,
}

pub type Result<T> = std::result::Result<T, HssError>;

/// Scalar types supported by the compression engine.
///
/// Covers `f32`, `f64`, `c32` and `c64`. The bound collects everything the
/// engine needs: LAPACK bindings for the rank-revealing decompositions,
/// random fills for the sampling phase, and `Send + Sync` so sibling node
/// tasks can run on worker threads.
pub trait HssScalar: Scalar + Lapack + PivotedQrScalar + RandomMatrix + Send + Sync {}

impl<A> HssScalar for A where A: Scalar + Lapack + PivotedQrScalar + RandomMatrix + Send + Sync {}
