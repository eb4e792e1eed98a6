//! Adaptive randomized compression.
//!
//! The driver owns the outer convergence loop: it draws random test
//! columns, obtains the matching sample columns from the kernel's multiply
//! oracle, and runs one recursive compression pass over the node hierarchy.
//! Any node finding its sample too narrow reports back by staying
//! partially compressed; the driver then doubles the useful sample width
//! and tries again, feeding the oracle only the newly added columns.
//!
//! Within one pass the recursion works post-order. A leaf materializes its
//! diagonal block; an internal node waits for both children, evaluates the
//! coupling blocks at the children's selected indices, and then, like a
//! leaf, subtracts everything already explained by finer levels from its
//! slice of the sample matrices, so its own basis only has to capture the
//! off-diagonal remainder. Sibling subtrees compress as concurrent tasks
//! down to a configurable depth; their node state and sample rows are
//! disjoint, and the shared sample matrices are handed out by splitting
//! views at the child boundary.

use crate::helpers::grow_cols;
use crate::hss::{HssMatrix, NodeState};
use crate::interpolative::interpolative_rows;
use crate::kernel::MatrixKernel;
use crate::options::{HssOptions, RestartPolicy};
use crate::random_matrix::RandomMatrix;
use crate::types::{HssScalar, Result};
use crate::work::WorkCompress;
use log::info;
use ndarray::linalg::general_mat_mul;
use ndarray::{concatenate, s, Array2, ArrayViewMut2, Axis};
use num::One;

/// Mutable views of the four shared sample/test matrices, restricted to one
/// node's row range.
pub(crate) struct SampleSet<'a, A> {
    pub rr: ArrayViewMut2<'a, A>,
    pub rc: ArrayViewMut2<'a, A>,
    pub sr: ArrayViewMut2<'a, A>,
    pub sc: ArrayViewMut2<'a, A>,
}

impl<'a, A> SampleSet<'a, A> {
    fn reborrow(&mut self) -> SampleSet<'_, A> {
        SampleSet {
            rr: self.rr.view_mut(),
            rc: self.rc.view_mut(),
            sr: self.sr.view_mut(),
            sc: self.sc.view_mut(),
        }
    }

    fn split_at(self, row: usize) -> (SampleSet<'a, A>, SampleSet<'a, A>) {
        let (rr0, rr1) = self.rr.split_at(Axis(0), row);
        let (rc0, rc1) = self.rc.split_at(Axis(0), row);
        let (sr0, sr1) = self.sr.split_at(Axis(0), row);
        let (sc0, sc1) = self.sc.split_at(Axis(0), row);
        (
            SampleSet {
                rr: rr0,
                rc: rc0,
                sr: sr0,
                sc: sc0,
            },
            SampleSet {
                rr: rr1,
                rc: rc1,
                sr: sr1,
                sc: sc1,
            },
        )
    }

    fn width(&self) -> usize {
        self.rr.ncols()
    }
}

/// Run `a` and `b` as concurrent tasks below the recursion cutoff, inline
/// otherwise.
fn maybe_join<RA, RB>(
    parallel: bool,
    a: impl FnOnce() -> RA + Send,
    b: impl FnOnce() -> RB + Send,
) -> (RA, RB)
where
    RA: Send,
    RB: Send,
{
    if parallel {
        rayon::join(a, b)
    } else {
        (a(), b())
    }
}

impl<A: HssScalar> HssMatrix<A> {
    /// Compress the matrix behind `kernel` into this node hierarchy,
    /// adaptively growing the sample width until every node converges.
    pub fn compress<K: MatrixKernel<A>>(&mut self, kernel: &K, opts: &HssOptions) -> Result<()> {
        assert_eq!(self.rows(), kernel.rows(), "kernel row count mismatch");
        assert_eq!(self.cols(), kernel.cols(), "kernel column count mismatch");
        match opts.restart_policy {
            RestartPolicy::Checkpointed => self.compress_checkpointed(kernel, opts),
            RestartPolicy::Hard => self.compress_hard_restart(kernel, opts),
        }
    }

    fn compress_checkpointed<K: MatrixKernel<A>>(
        &mut self,
        kernel: &K,
        opts: &HssOptions,
    ) -> Result<()> {
        let n = self.cols();
        let p = opts.oversampling;
        let mut d_old = 0usize;
        let mut d = opts.d0 + p;
        let mut rng = opts.rng();
        let mut rr = Array2::<A>::zeros((n, 0));
        let mut rc = Array2::<A>::zeros((n, 0));
        let mut sr = Array2::<A>::zeros((n, 0));
        let mut sc = Array2::<A>::zeros((n, 0));
        while !self.is_compressed() {
            grow_cols(&mut rr, d);
            grow_cols(&mut rc, d);
            grow_cols(&mut sr, d);
            grow_cols(&mut sc, d);
            if !opts.user_defined_random {
                A::fill_random(
                    rr.slice_mut(s![.., d_old..d]),
                    opts.random_distribution,
                    rng.as_mut(),
                );
                rc.slice_mut(s![.., d_old..d])
                    .assign(&rr.slice(s![.., d_old..d]));
            }
            kernel.multiply(
                rr.slice_mut(s![.., d_old..d]),
                rc.slice_mut(s![.., d_old..d]),
                sr.slice_mut(s![.., d_old..d]),
                sc.slice_mut(s![.., d_old..d]),
            );
            if opts.verbose {
                info!("compressing with d = {} + {}", d - p, p);
            }
            let mut w = WorkCompress::default();
            let smp = SampleSet {
                rr: rr.view_mut(),
                rc: rc.view_mut(),
                sr: sr.view_mut(),
                sc: sc.view_mut(),
            };
            self.compress_recursive(kernel, opts, &mut w, d - d_old, 0, smp)?;
            if !self.is_compressed() {
                d_old = d;
                d = 2 * (d_old - p) + p;
            }
        }
        Ok(())
    }

    fn compress_hard_restart<K: MatrixKernel<A>>(
        &mut self,
        kernel: &K,
        opts: &HssOptions,
    ) -> Result<()> {
        let n = self.cols();
        let p = opts.oversampling;
        let mut d_old = 0usize;
        let mut d = opts.d0 + p;
        let mut rng = opts.rng();
        // Pristine copies taken right after each oracle call; they let a
        // restart recompress everything without asking the oracle for the
        // old columns again.
        let mut rr2 = Array2::<A>::zeros((n, 0));
        let mut rc2 = Array2::<A>::zeros((n, 0));
        let mut sr2 = Array2::<A>::zeros((n, 0));
        let mut sc2 = Array2::<A>::zeros((n, 0));
        while !self.is_compressed() {
            let mut rr = Array2::<A>::zeros((n, d));
            let mut rc = Array2::<A>::zeros((n, d));
            let mut sr = Array2::<A>::zeros((n, d));
            let mut sc = Array2::<A>::zeros((n, d));
            rr.slice_mut(s![.., 0..d_old]).assign(&rr2);
            rc.slice_mut(s![.., 0..d_old]).assign(&rc2);
            sr.slice_mut(s![.., 0..d_old]).assign(&sr2);
            sc.slice_mut(s![.., 0..d_old]).assign(&sc2);
            if !opts.user_defined_random {
                A::fill_random(
                    rr.slice_mut(s![.., d_old..d]),
                    opts.random_distribution,
                    rng.as_mut(),
                );
                rc.slice_mut(s![.., d_old..d])
                    .assign(&rr.slice(s![.., d_old..d]));
            }
            kernel.multiply(
                rr.slice_mut(s![.., d_old..d]),
                rc.slice_mut(s![.., d_old..d]),
                sr.slice_mut(s![.., d_old..d]),
                sc.slice_mut(s![.., d_old..d]),
            );
            rr2 = rr.clone();
            rc2 = rc.clone();
            sr2 = sr.clone();
            sc2 = sc.clone();
            if opts.verbose {
                info!("compressing with d = {} + {} (hard restart)", d - p, p);
            }
            let mut w = WorkCompress::default();
            let smp = SampleSet {
                rr: rr.view_mut(),
                rc: rc.view_mut(),
                sr: sr.view_mut(),
                sc: sc.view_mut(),
            };
            self.compress_recursive(kernel, opts, &mut w, d, 0, smp)?;
            if !self.is_compressed() {
                d_old = d;
                d = 2 * (d_old - p) + p;
                self.reset();
            }
        }
        Ok(())
    }

    /// One compression pass over this subtree; `dd` counts the sample
    /// columns added since the node last saw the sample matrices.
    fn compress_recursive<K: MatrixKernel<A>>(
        &mut self,
        kernel: &K,
        opts: &HssOptions,
        w: &mut WorkCompress,
        dd: usize,
        depth: usize,
        mut smp: SampleSet<'_, A>,
    ) -> Result<()> {
        let tasked = depth < opts.task_cutoff;
        if self.is_leaf() {
            if self.state == NodeState::Untouched {
                let i: Vec<usize> = (w.offset.0..w.offset.0 + self.rows()).collect();
                let j: Vec<usize> = (w.offset.1..w.offset.1 + self.cols()).collect();
                self.d = kernel.extract(&i, &j);
            }
        } else {
            let dim0 = {
                let (c0, _) = self.children().unwrap();
                (c0.rows(), c0.cols())
            };
            w.split(dim0);
            {
                let (w0, w1) = w.children_mut();
                let (c0, c1) = self.children_mut().unwrap();
                let (s0, s1) = smp.reborrow().split_at(dim0.0);
                let (res0, res1) = maybe_join(
                    tasked,
                    || c0.compress_recursive(kernel, opts, w0, dd, depth + 1, s0),
                    || c1.compress_recursive(kernel, opts, w1, dd, depth + 1, s1),
                );
                res0?;
                res1?;
            }
            let children_done = {
                let (c0, c1) = self.children().unwrap();
                c0.is_compressed() && c1.is_compressed()
            };
            if !children_done {
                return Ok(());
            }
            if self.state == NodeState::Untouched {
                let (w0, w1) = w.children();
                let (b01, b10) = maybe_join(
                    tasked,
                    || kernel.extract(&w0.ir, &w1.ic),
                    || kernel.extract(&w1.ir, &w0.ic),
                );
                self.b01 = b01;
                self.b10 = b10;
            }
        }
        if w.lvl == 0 {
            self.state = NodeState::Compressed;
            return Ok(());
        }
        let d = smp.width();
        if self.state == NodeState::Untouched {
            self.update_local_samples(&mut smp, w, 0, d, tasked);
        } else {
            self.update_local_samples(&mut smp, w, d - dd, dd, tasked);
        }
        if self.state != NodeState::Compressed {
            if self.compute_bases(&smp, opts, w, d, tasked)? {
                self.reduce_local_samples(&mut smp, 0, d, tasked);
                self.state = NodeState::Compressed;
                self.row_indices = w.ir.clone();
                self.col_indices = w.ic.clone();
            } else {
                self.state = NodeState::PartiallyCompressed;
            }
        } else {
            // Converged in an earlier attempt: expose the stored selection
            // to the parent and keep the new columns consistent upstream.
            w.jr = self.row_basis().pivots().to_vec();
            w.jc = self.col_basis().pivots().to_vec();
            w.ir = self.row_indices.clone();
            w.ic = self.col_indices.clone();
            self.reduce_local_samples(&mut smp, d - dd, dd, tasked);
        }
        Ok(())
    }

    /// Subtract from columns `d0 .. d0 + dn` of this node's sample slice
    /// everything already accounted for by converged structure, leaving the
    /// residual the node's own bases must explain.
    fn update_local_samples(
        &self,
        smp: &mut SampleSet<'_, A>,
        w: &WorkCompress,
        d0: usize,
        dn: usize,
        tasked: bool,
    ) {
        let SampleSet { rr, rc, sr, sc } = smp.reborrow();
        maybe_join(
            tasked,
            || self.update_row_samples(rr, sr, w, d0, dn),
            || self.update_col_samples(rc, sc, w, d0, dn),
        );
    }

    fn update_row_samples(
        &self,
        rr: ArrayViewMut2<A>,
        mut sr: ArrayViewMut2<A>,
        w: &WorkCompress,
        d0: usize,
        dn: usize,
    ) {
        if self.is_leaf() {
            let wrr = rr.slice(s![.., d0..d0 + dn]);
            let mut wsr = sr.slice_mut(s![.., d0..d0 + dn]);
            general_mat_mul(-A::one(), &self.d, &wrr, A::one(), &mut wsr);
        } else {
            let (c0, c1) = self.children().unwrap();
            let (w0, w1) = w.children();
            let m0 = c0.rows();
            let (r0, r1) = (c0.u_rank(), c1.u_rank());
            // Pull the children's residuals at their pivot rows into
            // temporaries first; the destination rows overlap the sources.
            let top = sr
                .slice(s![0..c0.u_rows(), d0..d0 + dn])
                .select(Axis(0), &w0.jr);
            let bottom = sr
                .slice(s![m0..m0 + c1.u_rows(), d0..d0 + dn])
                .select(Axis(0), &w1.jr);
            sr.slice_mut(s![0..r0, d0..d0 + dn]).assign(&top);
            sr.slice_mut(s![r0..r0 + r1, d0..d0 + dn]).assign(&bottom);
            let wrr0 = rr.slice(s![0..c0.v_rank(), d0..d0 + dn]);
            let wrr1 = rr.slice(s![m0..m0 + c1.v_rank(), d0..d0 + dn]);
            general_mat_mul(
                -A::one(),
                &self.b01,
                &wrr1,
                A::one(),
                &mut sr.slice_mut(s![0..r0, d0..d0 + dn]),
            );
            general_mat_mul(
                -A::one(),
                &self.b10,
                &wrr0,
                A::one(),
                &mut sr.slice_mut(s![r0..r0 + r1, d0..d0 + dn]),
            );
        }
    }

    fn update_col_samples(
        &self,
        rc: ArrayViewMut2<A>,
        mut sc: ArrayViewMut2<A>,
        w: &WorkCompress,
        d0: usize,
        dn: usize,
    ) {
        if self.is_leaf() {
            let wrc = rc.slice(s![.., d0..d0 + dn]);
            let mut wsc = sc.slice_mut(s![.., d0..d0 + dn]);
            let adjoint = self.d.t().map(|item| item.conj());
            general_mat_mul(-A::one(), &adjoint, &wrc, A::one(), &mut wsc);
        } else {
            let (c0, c1) = self.children().unwrap();
            let (w0, w1) = w.children();
            let m0 = c0.cols();
            let (q0, q1) = (c0.v_rank(), c1.v_rank());
            let top = sc
                .slice(s![0..c0.v_rows(), d0..d0 + dn])
                .select(Axis(0), &w0.jc);
            let bottom = sc
                .slice(s![m0..m0 + c1.v_rows(), d0..d0 + dn])
                .select(Axis(0), &w1.jc);
            sc.slice_mut(s![0..q0, d0..d0 + dn]).assign(&top);
            sc.slice_mut(s![q0..q0 + q1, d0..d0 + dn]).assign(&bottom);
            let wrc0 = rc.slice(s![0..c0.u_rank(), d0..d0 + dn]);
            let wrc1 = rc.slice(s![m0..m0 + c1.u_rank(), d0..d0 + dn]);
            let b10h = self.b10.t().map(|item| item.conj());
            let b01h = self.b01.t().map(|item| item.conj());
            general_mat_mul(
                -A::one(),
                &b10h,
                &wrc1,
                A::one(),
                &mut sc.slice_mut(s![0..q0, d0..d0 + dn]),
            );
            general_mat_mul(
                -A::one(),
                &b01h,
                &wrc0,
                A::one(),
                &mut sc.slice_mut(s![q0..q0 + q1, d0..d0 + dn]),
            );
        }
    }

    /// Attempt row and column bases from the residual samples. Returns
    /// whether the attempt is trusted: either the sample's useful width has
    /// hit the rank ceiling, or both bases stopped growing before
    /// exhausting it.
    fn compute_bases(
        &mut self,
        smp: &SampleSet<'_, A>,
        opts: &HssOptions,
        w: &mut WorkCompress,
        d: usize,
        tasked: bool,
    ) -> Result<bool> {
        // Deeper nodes are held to a tighter tolerance so the error
        // accumulated across levels stays bounded by the requested one.
        let lvl = w.lvl as f64;
        let rel_tol = opts.rel_tol / lvl;
        let abs_tol = opts.abs_tol / lvl;
        let (u_rows, v_rows) = if self.is_leaf() {
            (self.rows(), self.cols())
        } else {
            let (c0, c1) = self.children().unwrap();
            (c0.u_rank() + c1.u_rank(), c0.v_rank() + c1.v_rank())
        };
        let (row_id, col_id) = maybe_join(
            tasked,
            || {
                interpolative_rows(
                    smp.sr.slice(s![0..u_rows, ..]),
                    rel_tol,
                    abs_tol,
                    opts.max_rank,
                )
            },
            || {
                interpolative_rows(
                    smp.sc.slice(s![0..v_rows, ..]),
                    rel_tol,
                    abs_tol,
                    opts.max_rank,
                )
            },
        );
        let u = row_id?;
        let v = col_id?;

        let useful = d - opts.oversampling;
        if useful < opts.max_rank && (u.rank() >= useful || v.rank() >= useful) {
            w.jr.clear();
            w.jc.clear();
            return Ok(false);
        }
        w.jr = u.pivots().to_vec();
        w.jc = v.pivots().to_vec();
        if self.is_leaf() {
            w.ir = w.jr.iter().map(|&i| w.offset.0 + i).collect();
            w.ic = w.jc.iter().map(|&j| w.offset.1 + j).collect();
        } else {
            let (ir, ic) = {
                let (w0, w1) = w.children();
                let r0 = w0.ir.len();
                let ir = w
                    .jr
                    .iter()
                    .map(|&i| if i < r0 { w0.ir[i] } else { w1.ir[i - r0] })
                    .collect();
                let q0 = w0.ic.len();
                let ic = w
                    .jc
                    .iter()
                    .map(|&j| if j < q0 { w0.ic[j] } else { w1.ic[j - q0] })
                    .collect();
                (ir, ic)
            };
            w.ir = ir;
            w.ic = ic;
        }
        self.u = u;
        self.v = v;
        Ok(true)
    }

    /// Re-express this node's slice of the test matrices in its new basis,
    /// shrinking the rows the parent will read from raw extent to rank.
    fn reduce_local_samples(
        &self,
        smp: &mut SampleSet<'_, A>,
        d0: usize,
        dn: usize,
        tasked: bool,
    ) {
        let SampleSet { rr, rc, .. } = smp.reborrow();
        maybe_join(
            tasked,
            || self.reduce_row_tests(rr, d0, dn),
            || self.reduce_col_tests(rc, d0, dn),
        );
    }

    fn reduce_row_tests(&self, mut rr: ArrayViewMut2<A>, d0: usize, dn: usize) {
        let reduced = if self.is_leaf() {
            self.col_basis()
                .apply_conj(rr.slice(s![0..self.v_rows(), d0..d0 + dn]))
        } else {
            let (c0, c1) = self.children().unwrap();
            let m0 = c0.rows();
            let top = rr.slice(s![0..c0.v_rank(), d0..d0 + dn]).to_owned();
            let bottom = rr.slice(s![m0..m0 + c1.v_rank(), d0..d0 + dn]).to_owned();
            let stacked =
                concatenate(Axis(0), &[top.view(), bottom.view()]).expect("test column stacking");
            self.col_basis().apply_conj(stacked.view())
        };
        rr.slice_mut(s![0..self.v_rank(), d0..d0 + dn]).assign(&reduced);
    }

    fn reduce_col_tests(&self, mut rc: ArrayViewMut2<A>, d0: usize, dn: usize) {
        let reduced = if self.is_leaf() {
            self.row_basis()
                .apply_conj(rc.slice(s![0..self.u_rows(), d0..d0 + dn]))
        } else {
            let (c0, c1) = self.children().unwrap();
            let m0 = c0.rows();
            let top = rc.slice(s![0..c0.u_rank(), d0..d0 + dn]).to_owned();
            let bottom = rc.slice(s![m0..m0 + c1.u_rank(), d0..d0 + dn]).to_owned();
            let stacked =
                concatenate(Axis(0), &[top.view(), bottom.view()]).expect("test column stacking");
            self.row_basis().apply_conj(stacked.view())
        };
        rc.slice_mut(s![0..self.u_rank(), d0..d0 + dn]).assign(&reduced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::RelDiff;
    use crate::kernel::DenseKernel;
    use crate::tree::PartitionTree;
    use ndarray::ArrayView2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn for_each_node<A: HssScalar>(node: &HssMatrix<A>, f: &mut impl FnMut(&HssMatrix<A>)) {
        f(node);
        if let Some((left, right)) = node.children() {
            for_each_node(left, f);
            for_each_node(right, f);
        }
    }

    /// Deterministic values in [-0.5, 0.5), good enough to stand in for
    /// random test columns and test matrices.
    fn pseudo(col: usize, row: usize, salt: u64) -> f64 {
        let mut z = (col as u64 + 1)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (row as u64 + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9)
            ^ salt;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z as f64 / u64::MAX as f64) - 0.5
    }

    fn exact_rank_matrix(n: usize, rank: usize) -> Array2<f64> {
        let left = Array2::from_shape_fn((n, rank), |(i, k)| pseudo(k, i, 1));
        let right = Array2::from_shape_fn((rank, n), |(k, j)| pseudo(k, j, 2));
        left.dot(&right)
    }

    fn gaussian_kernel_matrix(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            let x = i as f64 / n as f64;
            let y = j as f64 / n as f64;
            (-4.0 * (x - y) * (x - y)).exp()
        })
    }

    /// Kernel wrapper counting oracle traffic.
    struct CountingKernel<'a> {
        inner: DenseKernel<'a, f64>,
        multiplies: AtomicUsize,
        extracts: AtomicUsize,
    }

    impl<'a> CountingKernel<'a> {
        fn new(mat: ArrayView2<'a, f64>) -> Self {
            CountingKernel {
                inner: DenseKernel::new(mat),
                multiplies: AtomicUsize::new(0),
                extracts: AtomicUsize::new(0),
            }
        }
    }

    impl MatrixKernel<f64> for CountingKernel<'_> {
        fn rows(&self) -> usize {
            self.inner.rows()
        }

        fn cols(&self) -> usize {
            self.inner.cols()
        }

        fn multiply(
            &self,
            rr: ArrayViewMut2<f64>,
            rc: ArrayViewMut2<f64>,
            sr: ArrayViewMut2<f64>,
            sc: ArrayViewMut2<f64>,
        ) {
            self.multiplies.fetch_add(1, Ordering::SeqCst);
            self.inner.multiply(rr, rc, sr, sc);
        }

        fn extract(&self, rows: &[usize], cols: &[usize]) -> Array2<f64> {
            self.extracts.fetch_add(1, Ordering::SeqCst);
            self.inner.extract(rows, cols)
        }
    }

    /// Kernel that supplies its own deterministic test columns, for
    /// exercising the `user_defined_random` path and for comparing restart
    /// policies against identical sampling sequences.
    struct SuppliedRandomKernel<'a> {
        mat: ArrayView2<'a, f64>,
        consumed: AtomicUsize,
    }

    impl<'a> SuppliedRandomKernel<'a> {
        fn new(mat: ArrayView2<'a, f64>) -> Self {
            SuppliedRandomKernel {
                mat,
                consumed: AtomicUsize::new(0),
            }
        }
    }

    impl MatrixKernel<f64> for SuppliedRandomKernel<'_> {
        fn rows(&self) -> usize {
            self.mat.nrows()
        }

        fn cols(&self) -> usize {
            self.mat.ncols()
        }

        fn multiply(
            &self,
            mut rr: ArrayViewMut2<f64>,
            mut rc: ArrayViewMut2<f64>,
            mut sr: ArrayViewMut2<f64>,
            mut sc: ArrayViewMut2<f64>,
        ) {
            let start = self.consumed.fetch_add(rr.ncols(), Ordering::SeqCst);
            for (c, mut col) in rr.axis_iter_mut(Axis(1)).enumerate() {
                for (r, value) in col.iter_mut().enumerate() {
                    *value = pseudo(start + c, r, 7);
                }
            }
            rc.assign(&rr);
            sr.assign(&self.mat.dot(&rr));
            sc.assign(&self.mat.t().dot(&rc));
        }

        fn extract(&self, rows: &[usize], cols: &[usize]) -> Array2<f64> {
            Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
                self.mat[[rows[i], cols[j]]]
            })
        }
    }

    #[test]
    fn identity_compresses_with_trivial_couplings() {
        let n = 64;
        let mat = Array2::<f64>::eye(n);
        let opts = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(8)
            .with_oversampling(4)
            .with_rel_tol(1e-6);
        let kernel = CountingKernel::new(mat.view());
        let mut hss = HssMatrix::<f64>::new(n, &opts);
        hss.compress(&kernel, &opts).unwrap();

        assert!(hss.is_compressed());
        // The identity has zero off-diagonal blocks, so the leaf diagonal
        // blocks absorb everything and every basis comes out empty.
        assert_eq!(hss.rank(), 0);
        for_each_node(&hss, &mut |node| {
            if !node.is_leaf() {
                let (b01, b10) = node.coupling_blocks();
                assert_eq!(b01.dim(), (0, 0));
                assert_eq!(b10.dim(), (0, 0));
            }
        });
        // One attempt suffices.
        assert_eq!(kernel.multiplies.load(Ordering::SeqCst), 1);

        let mut rng = rand::thread_rng();
        let probe = f64::random_gaussian((n, 2), &mut rng);
        let product = hss.apply(probe.view());
        assert!(f64::rel_diff_fro(product.view(), probe.view()) < 1e-12);
    }

    macro_rules! exact_rank_tests {
        ($($name:ident: $scalar:ty,)*) => {
            $(

        #[test]
        fn $name() {
            let n = 128;
            let rank = 5;
            let mut rng = rand::thread_rng();
            let left = <$scalar>::random_gaussian((n, rank), &mut rng);
            let right = <$scalar>::random_gaussian((rank, n), &mut rng);
            let mat = left.dot(&right);

            let opts = HssOptions::default()
                .with_leaf_size(16)
                .with_d0(16)
                .with_oversampling(6)
                .with_rel_tol(1e-9);
            let kernel = DenseKernel::new(mat.view());
            let mut hss = HssMatrix::<$scalar>::new(n, &opts);
            hss.compress(&kernel, &opts).unwrap();

            assert!(hss.is_compressed());
            for_each_node(&hss, &mut |node| {
                assert!(node.u_rank() <= rank);
                assert!(node.v_rank() <= rank);
            });

            let probe = <$scalar>::random_gaussian((n, 3), &mut rng);
            let compressed = hss.apply(probe.view());
            let direct = mat.dot(&probe);
            assert!(<$scalar>::rel_diff_fro(compressed.view(), direct.view()) < 1e-7);
        }

            )*
        }
    }

    exact_rank_tests! {
        exact_rank_matrix_bounds_every_basis_f64: f64,
        exact_rank_matrix_bounds_every_basis_c64: ndarray_linalg::c64,
    }

    #[test]
    fn smooth_kernel_end_to_end() {
        let n = 256;
        let mat = gaussian_kernel_matrix(n);
        let opts = HssOptions::default()
            .with_leaf_size(32)
            .with_d0(16)
            .with_oversampling(10)
            .with_rel_tol(1e-8)
            .with_max_rank(64);
        let kernel = CountingKernel::new(mat.view());
        let mut hss = HssMatrix::<f64>::new(n, &opts);
        hss.compress(&kernel, &opts).unwrap();

        assert!(hss.is_compressed());
        assert!(hss.rank() <= 64);
        // Each multiply is one attempt; the width doubles between attempts.
        assert!(kernel.multiplies.load(Ordering::SeqCst) <= 6);

        let mut rng = rand::thread_rng();
        let probe = f64::random_gaussian((n, 3), &mut rng);
        let compressed = hss.apply(probe.view());
        let direct = mat.dot(&probe);
        assert!(f64::rel_diff_fro(compressed.view(), direct.view()) < 1e-5);
    }

    #[test]
    fn conj_transpose_product_matches_dense() {
        use ndarray_linalg::c64;

        let n = 96;
        let rank = 6;
        let mut rng = rand::thread_rng();
        let left = c64::random_gaussian((n, rank), &mut rng);
        let right = c64::random_gaussian((rank, n), &mut rng);
        let mat = left.dot(&right);

        let opts = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(16)
            .with_oversampling(6)
            .with_rel_tol(1e-9);
        let kernel = DenseKernel::new(mat.view());
        let mut hss = HssMatrix::<c64>::new(n, &opts);
        hss.compress(&kernel, &opts).unwrap();
        assert!(hss.is_compressed());

        let probe = c64::random_gaussian((n, 2), &mut rng);
        let compressed = hss.apply_conj_transpose(probe.view());
        let direct = mat.t().map(|v| v.conj()).dot(&probe);
        assert!(c64::rel_diff_fro(compressed.view(), direct.view()) < 1e-7);
    }

    #[test]
    fn recompressing_makes_no_oracle_calls() {
        let n = 128;
        let mat = gaussian_kernel_matrix(n);
        let opts = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(16)
            .with_oversampling(8)
            .with_rel_tol(1e-6)
            .with_max_rank(64);
        let kernel = CountingKernel::new(mat.view());
        let mut hss = HssMatrix::<f64>::new(n, &opts);
        hss.compress(&kernel, &opts).unwrap();
        assert!(hss.is_compressed());

        let multiplies = kernel.multiplies.load(Ordering::SeqCst);
        let extracts = kernel.extracts.load(Ordering::SeqCst);
        let mut pivots = Vec::new();
        for_each_node(&hss, &mut |node| {
            pivots.push(node.row_basis().pivots().to_vec());
        });

        hss.compress(&kernel, &opts).unwrap();
        assert_eq!(kernel.multiplies.load(Ordering::SeqCst), multiplies);
        assert_eq!(kernel.extracts.load(Ordering::SeqCst), extracts);
        let mut pivots_after = Vec::new();
        for_each_node(&hss, &mut |node| {
            pivots_after.push(node.row_basis().pivots().to_vec());
        });
        assert_eq!(pivots, pivots_after);
    }

    #[test]
    fn restart_policies_agree_without_restarts() {
        let n = 96;
        let mat = exact_rank_matrix(n, 4);
        let base = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(12)
            .with_oversampling(6)
            .with_rel_tol(1e-9)
            .with_user_defined_random(true);

        let kernel_a = SuppliedRandomKernel::new(mat.view());
        let mut checkpointed = HssMatrix::<f64>::new(n, &base);
        checkpointed.compress(&kernel_a, &base).unwrap();

        let kernel_b = SuppliedRandomKernel::new(mat.view());
        let hard_opts = base.clone().with_restart_policy(RestartPolicy::Hard);
        let mut hard = HssMatrix::<f64>::new(n, &hard_opts);
        hard.compress(&kernel_b, &hard_opts).unwrap();

        assert!(checkpointed.is_compressed() && hard.is_compressed());

        fn compare(a: &HssMatrix<f64>, b: &HssMatrix<f64>) {
            assert_eq!(a.u_rank(), b.u_rank());
            assert_eq!(a.v_rank(), b.v_rank());
            assert_eq!(a.row_basis().pivots(), b.row_basis().pivots());
            assert_eq!(a.col_basis().pivots(), b.col_basis().pivots());
            assert_eq!(a.row_indices(), b.row_indices());
            assert_eq!(a.col_indices(), b.col_indices());
            match (a.children(), b.children()) {
                (Some((a0, a1)), Some((b0, b1))) => {
                    compare(a0, b0);
                    compare(a1, b1);
                }
                (None, None) => (),
                _ => panic!("tree shapes differ"),
            }
        }
        compare(&checkpointed, &hard);

        let probe = Array2::from_shape_fn((n, 2), |(i, j)| pseudo(j, i, 11));
        let ya = checkpointed.apply(probe.view());
        let yb = hard.apply(probe.view());
        assert!(f64::rel_diff_fro(ya.view(), yb.view()) < 1e-10);
    }

    #[test]
    fn restart_policies_agree_across_forced_restarts() {
        let n = 96;
        let mat = exact_rank_matrix(n, 4);
        let base = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(2)
            .with_oversampling(2)
            .with_rel_tol(1e-9)
            .with_user_defined_random(true);

        let kernel_a = SuppliedRandomKernel::new(mat.view());
        let mut checkpointed = HssMatrix::<f64>::new(n, &base);
        checkpointed.compress(&kernel_a, &base).unwrap();

        let kernel_b = SuppliedRandomKernel::new(mat.view());
        let hard_opts = base.clone().with_restart_policy(RestartPolicy::Hard);
        let mut hard = HssMatrix::<f64>::new(n, &hard_opts);
        hard.compress(&kernel_b, &hard_opts).unwrap();

        assert!(checkpointed.is_compressed() && hard.is_compressed());
        // Both kernels saw the same column sequence, so the discovered
        // ranks agree even though the hard variant recompressed everything.
        assert_eq!(
            kernel_a.consumed.load(Ordering::SeqCst),
            kernel_b.consumed.load(Ordering::SeqCst)
        );

        fn ranks(node: &HssMatrix<f64>, out: &mut Vec<(usize, usize)>) {
            out.push((node.u_rank(), node.v_rank()));
            if let Some((left, right)) = node.children() {
                ranks(left, out);
                ranks(right, out);
            }
        }
        let mut ra = Vec::new();
        let mut rb = Vec::new();
        ranks(&checkpointed, &mut ra);
        ranks(&hard, &mut rb);
        assert_eq!(ra, rb);

        let probe = Array2::from_shape_fn((n, 2), |(i, j)| pseudo(j, i, 13));
        let direct = mat.dot(&probe);
        let ya = checkpointed.apply(probe.view());
        let yb = hard.apply(probe.view());
        assert!(f64::rel_diff_fro(ya.view(), direct.view()) < 1e-6);
        assert!(f64::rel_diff_fro(yb.view(), direct.view()) < 1e-6);
    }

    #[test]
    fn zero_size_leaves_are_tolerated() {
        let n = 9;
        let mut tree = PartitionTree::new(n);
        tree.refine(2);
        tree.expand_complete(true);
        assert!(tree.leaf_sizes().contains(&0));

        let mat = Array2::<f64>::eye(n);
        let opts = HssOptions::default()
            .with_d0(6)
            .with_oversampling(3)
            .with_rel_tol(1e-8);
        let kernel = DenseKernel::new(mat.view());
        let mut hss = HssMatrix::<f64>::from_partition_tree(&tree);
        hss.compress(&kernel, &opts).unwrap();

        assert!(hss.is_compressed());
        let mut rng = rand::thread_rng();
        let probe = f64::random_gaussian((n, 2), &mut rng);
        let product = hss.apply(probe.view());
        assert!(f64::rel_diff_fro(product.view(), probe.view()) < 1e-12);
    }

    #[test]
    fn uneven_partition_compresses() {
        let n = 100;
        let mat = gaussian_kernel_matrix(n);
        let opts = HssOptions::default()
            .with_leaf_size(13)
            .with_d0(16)
            .with_oversampling(8)
            .with_rel_tol(1e-8)
            .with_max_rank(64);
        let kernel = DenseKernel::new(mat.view());
        let mut hss = HssMatrix::<f64>::new(n, &opts);
        hss.compress(&kernel, &opts).unwrap();
        assert!(hss.is_compressed());

        let mut rng = rand::thread_rng();
        let probe = f64::random_gaussian((n, 2), &mut rng);
        let compressed = hss.apply(probe.view());
        let direct = mat.dot(&probe);
        assert!(f64::rel_diff_fro(compressed.view(), direct.view()) < 1e-5);
    }

    #[test]
    fn sequential_cutoff_matches_tasked_recursion() {
        let n = 128;
        let mat = gaussian_kernel_matrix(n);
        let opts = HssOptions::default()
            .with_leaf_size(16)
            .with_d0(16)
            .with_oversampling(8)
            .with_rel_tol(1e-8)
            .with_max_rank(64);

        let kernel = DenseKernel::new(mat.view());
        let mut tasked = HssMatrix::<f64>::new(n, &opts);
        tasked.compress(&kernel, &opts).unwrap();

        let serial_opts = opts.clone().with_task_cutoff(0);
        let mut serial = HssMatrix::<f64>::new(n, &serial_opts);
        serial.compress(&kernel, &serial_opts).unwrap();

        assert!(tasked.is_compressed() && serial.is_compressed());
        assert_eq!(tasked.rank(), serial.rank());

        let mut rng = rand::thread_rng();
        let probe = f64::random_gaussian((n, 2), &mut rng);
        let ya = tasked.apply(probe.view());
        let yb = serial.apply(probe.view());
        assert!(f64::rel_diff_fro(ya.view(), yb.view()) < 1e-10);
    }
}
