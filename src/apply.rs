//! Products with a compressed matrix.
//!
//! The product runs in two sweeps. Going up, each node projects its slice
//! of the input onto its column basis, leaves first, internal nodes from
//! their children's projections. Going down, the coupling blocks route each
//! node's projection to its sibling, row bases expand the accumulated
//! contributions back towards the leaves, and each leaf adds its dense
//! diagonal block. The conjugate-transposed product mirrors the same sweeps
//! with the roles of the two bases exchanged.

use crate::hss::HssMatrix;
use crate::types::HssScalar;
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

/// Per-node projections of the input block, kept for the downward sweep.
struct Projection<A> {
    z: Array2<A>,
    c: Option<Box<(Projection<A>, Projection<A>)>>,
}

impl<A: HssScalar> HssMatrix<A> {
    /// Multiply the compressed matrix with a block of vectors.
    pub fn apply(&self, x: ArrayView2<A>) -> Array2<A> {
        assert!(self.is_compressed(), "apply requires a compressed matrix");
        assert_eq!(x.nrows(), self.cols(), "input row count mismatch");
        let mut y = Array2::<A>::zeros((self.rows(), x.ncols()));
        match self.children() {
            None => y.assign(&self.d.dot(&x)),
            Some((c0, c1)) => {
                let (x0, x1) = x.split_at(Axis(0), c0.cols());
                let t0 = c0.project(x0);
                let t1 = c1.project(x1);
                let f0 = self.b01.dot(&t1.z);
                let f1 = self.b10.dot(&t0.z);
                let (y0, y1) = y.view_mut().split_at(Axis(0), c0.rows());
                c0.expand(f0, &t0, x0, y0);
                c1.expand(f1, &t1, x1, y1);
            }
        }
        y
    }

    /// Multiply the conjugate transpose of the compressed matrix with a
    /// block of vectors.
    pub fn apply_conj_transpose(&self, x: ArrayView2<A>) -> Array2<A> {
        assert!(self.is_compressed(), "apply requires a compressed matrix");
        assert_eq!(x.nrows(), self.rows(), "input row count mismatch");
        let mut y = Array2::<A>::zeros((self.cols(), x.ncols()));
        match self.children() {
            None => y.assign(&self.d.t().map(|v| v.conj()).dot(&x)),
            Some((c0, c1)) => {
                let (x0, x1) = x.split_at(Axis(0), c0.rows());
                let t0 = c0.project_adjoint(x0);
                let t1 = c1.project_adjoint(x1);
                let b01h = self.b01.t().map(|v| v.conj());
                let b10h = self.b10.t().map(|v| v.conj());
                let f0 = b10h.dot(&t1.z);
                let f1 = b01h.dot(&t0.z);
                let (y0, y1) = y.view_mut().split_at(Axis(0), c0.cols());
                c0.expand_adjoint(f0, &t0, x0, y0);
                c1.expand_adjoint(f1, &t1, x1, y1);
            }
        }
        y
    }

    /// Convenience wrapper of [`apply`](HssMatrix::apply) for a single
    /// vector.
    pub fn apply_vec(&self, x: ArrayView1<A>) -> Array1<A> {
        let x = x.insert_axis(Axis(1));
        self.apply(x).index_axis(Axis(1), 0).to_owned()
    }

    fn project(&self, x: ArrayView2<A>) -> Projection<A> {
        match self.children() {
            None => Projection {
                z: self.v.apply_conj(x),
                c: None,
            },
            Some((c0, c1)) => {
                let (x0, x1) = x.split_at(Axis(0), c0.cols());
                let t0 = c0.project(x0);
                let t1 = c1.project(x1);
                let stacked = concatenate(Axis(0), &[t0.z.view(), t1.z.view()])
                    .expect("projection stacking");
                Projection {
                    z: self.v.apply_conj(stacked.view()),
                    c: Some(Box::new((t0, t1))),
                }
            }
        }
    }

    fn expand(&self, f: Array2<A>, t: &Projection<A>, x: ArrayView2<A>, mut y: ArrayViewMut2<A>) {
        match self.children() {
            None => y.assign(&(self.d.dot(&x) + self.u.apply(f.view()))),
            Some((c0, c1)) => {
                let uf = self.u.apply(f.view());
                let (t0, t1) = {
                    let c = t.c.as_ref().expect("projection tree mismatch");
                    (&c.0, &c.1)
                };
                let r0 = c0.u_rank();
                let f0 = self.b01.dot(&t1.z) + uf.slice(s![0..r0, ..]);
                let f1 = self.b10.dot(&t0.z) + uf.slice(s![r0.., ..]);
                let (x0, x1) = x.split_at(Axis(0), c0.cols());
                let (y0, y1) = y.split_at(Axis(0), c0.rows());
                c0.expand(f0, t0, x0, y0);
                c1.expand(f1, t1, x1, y1);
            }
        }
    }

    fn project_adjoint(&self, x: ArrayView2<A>) -> Projection<A> {
        match self.children() {
            None => Projection {
                z: self.u.apply_conj(x),
                c: None,
            },
            Some((c0, c1)) => {
                let (x0, x1) = x.split_at(Axis(0), c0.rows());
                let t0 = c0.project_adjoint(x0);
                let t1 = c1.project_adjoint(x1);
                let stacked = concatenate(Axis(0), &[t0.z.view(), t1.z.view()])
                    .expect("projection stacking");
                Projection {
                    z: self.u.apply_conj(stacked.view()),
                    c: Some(Box::new((t0, t1))),
                }
            }
        }
    }

    fn expand_adjoint(
        &self,
        f: Array2<A>,
        t: &Projection<A>,
        x: ArrayView2<A>,
        mut y: ArrayViewMut2<A>,
    ) {
        match self.children() {
            None => y.assign(&(self.d.t().map(|v| v.conj()).dot(&x) + self.v.apply(f.view()))),
            Some((c0, c1)) => {
                let vf = self.v.apply(f.view());
                let (t0, t1) = {
                    let c = t.c.as_ref().expect("projection tree mismatch");
                    (&c.0, &c.1)
                };
                let q0 = c0.v_rank();
                let b01h = self.b01.t().map(|v| v.conj());
                let b10h = self.b10.t().map(|v| v.conj());
                let f0 = b10h.dot(&t1.z) + vf.slice(s![0..q0, ..]);
                let f1 = b01h.dot(&t0.z) + vf.slice(s![q0.., ..]);
                let (x0, x1) = x.split_at(Axis(0), c0.rows());
                let (y0, y1) = y.split_at(Axis(0), c0.cols());
                c0.expand_adjoint(f0, t0, x0, y0);
                c1.expand_adjoint(f1, t1, x1, y1);
            }
        }
    }
}
