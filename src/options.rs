//! Tunables for the compression driver.

use crate::random_matrix::RandomDistribution;
use rand::rngs::{SmallRng, StdRng};
use rand::{RngCore, SeedableRng};

/// How the driver restarts when an attempt leaves nodes under-sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Keep previously computed sample matrices and node states; only the
    /// newly added test columns go through the multiply oracle.
    Checkpointed,
    /// Keep the sample matrices (so the oracle is still only called on the
    /// delta) but reset every node to untouched, forcing the whole tree to
    /// recompress from the wider sample. Useful when the oracle is not
    /// guaranteed consistent across calls.
    Hard,
}

/// Pseudo-random engine used for the test columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomEngine {
    /// `rand::rngs::StdRng`.
    Std,
    /// `rand::rngs::SmallRng`, cheaper and adequate for sampling.
    Small,
}

/// Configuration for [`HssMatrix`](crate::hss::HssMatrix) construction and
/// compression.
#[derive(Clone, Debug)]
pub struct HssOptions {
    /// Maximum leaf extent of the partition tree.
    pub leaf_size: usize,
    /// Base sample width of the first compression attempt.
    pub d0: usize,
    /// Extra random columns beyond the expected rank, kept constant across
    /// restarts so rank deficiency stays detectable.
    pub oversampling: usize,
    /// Relative tolerance of the rank-revealing decompositions.
    pub rel_tol: f64,
    /// Absolute tolerance of the rank-revealing decompositions.
    pub abs_tol: f64,
    /// Hard ceiling on any discovered rank; past it a basis is accepted
    /// regardless of the convergence criterion.
    pub max_rank: usize,
    pub restart_policy: RestartPolicy,
    pub random_engine: RandomEngine,
    pub random_distribution: RandomDistribution,
    /// Seed for the test-column generator. Compression is deterministic for
    /// a fixed seed.
    pub seed: u64,
    /// When set, the driver does not fill the test columns; the kernel's
    /// `multiply` is expected to write them itself.
    pub user_defined_random: bool,
    /// Recursion depth below which sibling subtrees compress as concurrent
    /// tasks; at or beyond it the recursion stays on the calling thread.
    pub task_cutoff: usize,
    pub verbose: bool,
}

impl Default for HssOptions {
    fn default() -> Self {
        HssOptions {
            leaf_size: 512,
            d0: 128,
            oversampling: 10,
            rel_tol: 1e-2,
            abs_tol: 1e-8,
            max_rank: 5000,
            restart_policy: RestartPolicy::Checkpointed,
            random_engine: RandomEngine::Std,
            random_distribution: RandomDistribution::Normal,
            seed: 1,
            user_defined_random: false,
            task_cutoff: 8,
            verbose: false,
        }
    }
}

impl HssOptions {
    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    pub fn with_d0(mut self, d0: usize) -> Self {
        self.d0 = d0;
        self
    }

    pub fn with_oversampling(mut self, oversampling: usize) -> Self {
        self.oversampling = oversampling;
        self
    }

    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    pub fn with_abs_tol(mut self, abs_tol: f64) -> Self {
        self.abs_tol = abs_tol;
        self
    }

    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn with_random_engine(mut self, engine: RandomEngine) -> Self {
        self.random_engine = engine;
        self
    }

    pub fn with_random_distribution(mut self, dist: RandomDistribution) -> Self {
        self.random_distribution = dist;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_user_defined_random(mut self, user_defined: bool) -> Self {
        self.user_defined_random = user_defined;
        self
    }

    pub fn with_task_cutoff(mut self, task_cutoff: usize) -> Self {
        self.task_cutoff = task_cutoff;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub(crate) fn rng(&self) -> Box<dyn RngCore> {
        match self.random_engine {
            RandomEngine::Std => Box::new(StdRng::seed_from_u64(self.seed)),
            RandomEngine::Small => Box::new(SmallRng::seed_from_u64(self.seed)),
        }
    }
}
