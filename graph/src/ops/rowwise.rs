//! Applies a node builder to each row of an input and rejoins the results.

use crate::graph::{Graph, NodeId};

impl Graph {
    /// Splits `x` into `rows` rows of `in_cols`, applies `builder` to each
    /// and joins the `1 x out_cols` results back into a
    /// `rows x out_cols` tensor.
    pub fn rowwise<F>(
        &mut self,
        x: NodeId,
        rows: usize,
        in_cols: usize,
        out_cols: usize,
        mut builder: F,
    ) -> NodeId
    where
        F: FnMut(&mut Graph, NodeId) -> NodeId,
    {
        let mut joined: Option<NodeId> = None;
        for r in 0..rows {
            let row = self.split(x, r, 0, 1, in_cols);
            let y = builder(self, row);
            joined = Some(match joined {
                None => y,
                Some(prev) => self.join(prev, y, r + 1, out_cols),
            });
        }
        // A single row passes through the builder output unchanged.
        match joined {
            Some(node) => self.iderivative(node),
            None => self.iderivative(x),
        }
    }
}
