//! The hierarchically semi-separable matrix representation.
//!
//! An [`HssMatrix`] node covers one block of the partition tree. Leaves hold
//! their diagonal block densely; internal nodes hold the two coupling blocks
//! between their children together with row/column interpolative bases that
//! express the node's off-diagonal content through a small set of selected
//! rows and columns. Bases and blocks are populated by the compression
//! drivers in [`compress`](crate::hss::HssMatrix::compress); until then a
//! node is untouched.

use crate::interpolative::IdBasis;
use crate::options::HssOptions;
use crate::tree::PartitionTree;
use crate::types::HssScalar;
use ndarray::{Array2, ArrayView2};

/// Per-node progress of the adaptive compression loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// No compression attempt has touched this node yet.
    Untouched,
    /// A basis was attempted but the sample was too narrow to trust it; the
    /// node waits for a wider sample.
    PartiallyCompressed,
    /// Bases and blocks are final; later attempts skip the node.
    Compressed,
}

#[derive(Clone, Debug)]
pub struct HssMatrix<A: HssScalar> {
    rows: usize,
    cols: usize,
    ch: Option<Box<(HssMatrix<A>, HssMatrix<A>)>>,
    /// Dense diagonal block; leaves only.
    pub(crate) d: Array2<A>,
    /// Coupling block from the left child's row basis to the right child's
    /// column basis, and its mirror image.
    pub(crate) b01: Array2<A>,
    pub(crate) b10: Array2<A>,
    pub(crate) u: IdBasis<A>,
    pub(crate) v: IdBasis<A>,
    pub(crate) state: NodeState,
    /// Global indices selected by the row/column bases, copied out of the
    /// work context when the node converges.
    pub(crate) row_indices: Vec<usize>,
    pub(crate) col_indices: Vec<usize>,
}

impl<A: HssScalar> HssMatrix<A> {
    /// Build the node skeleton for a square matrix of order `n`, using the
    /// partition tree obtained by recursive halving down to
    /// `opts.leaf_size`.
    pub fn new(n: usize, opts: &HssOptions) -> Self {
        let mut tree = PartitionTree::new(n);
        tree.refine(opts.leaf_size);
        Self::from_partition_tree(&tree)
    }

    /// Build the node skeleton over an explicit partition tree.
    pub fn from_partition_tree(tree: &PartitionTree) -> Self {
        let ch = tree.children().map(|(left, right)| {
            Box::new((
                Self::from_partition_tree(left),
                Self::from_partition_tree(right),
            ))
        });
        HssMatrix {
            rows: tree.size,
            cols: tree.size,
            ch,
            d: Array2::zeros((0, 0)),
            b01: Array2::zeros((0, 0)),
            b10: Array2::zeros((0, 0)),
            u: IdBasis::empty(),
            v: IdBasis::empty(),
            state: NodeState::Untouched,
            row_indices: Vec::new(),
            col_indices: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_leaf(&self) -> bool {
        self.ch.is_none()
    }

    pub fn children(&self) -> Option<(&HssMatrix<A>, &HssMatrix<A>)> {
        self.ch.as_ref().map(|c| (&c.0, &c.1))
    }

    pub(crate) fn children_mut(&mut self) -> Option<(&mut HssMatrix<A>, &mut HssMatrix<A>)> {
        self.ch.as_mut().map(|c| (&mut c.0, &mut c.1))
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// True once every node of the subtree has converged. The recursion only
    /// marks a parent compressed after both children, so checking the root
    /// covers the whole tree.
    pub fn is_compressed(&self) -> bool {
        self.state == NodeState::Compressed
    }

    pub fn u_rank(&self) -> usize {
        self.u.rank()
    }

    pub fn v_rank(&self) -> usize {
        self.v.rank()
    }

    pub(crate) fn u_rows(&self) -> usize {
        self.u.rows()
    }

    pub(crate) fn v_rows(&self) -> usize {
        self.v.rows()
    }

    /// Largest basis rank discovered anywhere in the tree.
    pub fn rank(&self) -> usize {
        let own = self.u.rank().max(self.v.rank());
        match self.children() {
            Some((left, right)) => own.max(left.rank()).max(right.rank()),
            None => own,
        }
    }

    /// Depth of the node hierarchy; a single leaf counts one level.
    pub fn levels(&self) -> usize {
        match self.children() {
            Some((left, right)) => 1 + left.levels().max(right.levels()),
            None => 1,
        }
    }

    pub fn row_basis(&self) -> &IdBasis<A> {
        &self.u
    }

    pub fn col_basis(&self) -> &IdBasis<A> {
        &self.v
    }

    /// Global row indices selected by the row basis; empty until the node
    /// converges.
    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    /// The dense diagonal block of a leaf.
    pub fn dense_block(&self) -> ArrayView2<A> {
        self.d.view()
    }

    /// The two off-diagonal coupling blocks of an internal node.
    pub fn coupling_blocks(&self) -> (ArrayView2<A>, ArrayView2<A>) {
        (self.b01.view(), self.b10.view())
    }

    /// Forget all compression progress, returning every node to untouched.
    pub fn reset(&mut self) {
        self.state = NodeState::Untouched;
        self.u = IdBasis::empty();
        self.v = IdBasis::empty();
        self.row_indices.clear();
        self.col_indices.clear();
        if let Some(c) = &mut self.ch {
            c.0.reset();
            c.1.reset();
        }
    }
}
