//! Hierarchically semi-separable (HSS) matrix compression.
//!
//! This crate builds a compressed, hierarchical representation of a dense
//! matrix from nothing but two callbacks: a product of the matrix (and its
//! conjugate transpose) with blocks of vectors, and evaluation of arbitrary
//! sub-blocks of entries. Adaptive randomized sampling combined with
//! rank-revealing interpolative decompositions discovers, per node of a
//! binary partition tree, a minimal set of basis vectors and coupling
//! blocks reproducing the matrix to a requested accuracy, without prior
//! knowledge of its rank structure.

pub mod helpers;
pub mod hss;
pub mod interpolative;
pub mod kernel;
pub mod options;
pub mod pivoted_qr;
pub mod random_matrix;
pub mod tree;
pub mod types;

mod apply;
mod compress;
mod work;

pub use helpers::RelDiff;
pub use hss::{HssMatrix, NodeState};
pub use interpolative::{interpolative_rows, IdBasis};
pub use kernel::{DenseKernel, MatrixKernel};
pub use options::{HssOptions, RandomEngine, RestartPolicy};
pub use pivoted_qr::{PivotedQr, PivotedQrDecomp};
pub use random_matrix::{RandomDistribution, RandomMatrix};
pub use tree::PartitionTree;
pub use types::{c32, c64, HssError, HssScalar, Result};
