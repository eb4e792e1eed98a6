//! Per-attempt bookkeeping for the compression recursion.

/// State carried alongside one tree node for the duration of a single
/// compression attempt.
///
/// `offset` locates the node's block inside the global index set, `lvl` is
/// its distance from the root, `jr`/`jc` are the local pivot positions the
/// latest basis attempt produced, and `ir`/`ic` are those pivots mapped to
/// global row/column numbers. A fresh context tree is built for every
/// attempt; nodes that converged earlier repopulate their entry from the
/// state stored on the node when the recursion passes through them.
#[derive(Default, Debug)]
pub(crate) struct WorkCompress {
    pub offset: (usize, usize),
    pub lvl: usize,
    pub ir: Vec<usize>,
    pub ic: Vec<usize>,
    pub jr: Vec<usize>,
    pub jc: Vec<usize>,
    pub c: Option<Box<(WorkCompress, WorkCompress)>>,
}

impl WorkCompress {
    /// Create the children contexts below this node, once; `dim` is the left
    /// child's (rows, cols) extent.
    pub fn split(&mut self, dim: (usize, usize)) {
        if self.c.is_none() {
            let left = WorkCompress {
                offset: self.offset,
                lvl: self.lvl + 1,
                ..WorkCompress::default()
            };
            let right = WorkCompress {
                offset: (self.offset.0 + dim.0, self.offset.1 + dim.1),
                lvl: self.lvl + 1,
                ..WorkCompress::default()
            };
            self.c = Some(Box::new((left, right)));
        }
    }

    pub fn children(&self) -> (&WorkCompress, &WorkCompress) {
        let c = self.c.as_ref().expect("work context not split");
        (&c.0, &c.1)
    }

    pub fn children_mut(&mut self) -> (&mut WorkCompress, &mut WorkCompress) {
        let c = self.c.as_mut().expect("work context not split");
        (&mut c.0, &mut c.1)
    }
}
