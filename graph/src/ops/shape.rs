//! Shape operators: transpose, reshape, split, join, broadcast and the
//! identity-derivative wrapper used by composite builders.

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

pub(crate) struct Transpose;

impl Op for Transpose {
    fn label(&self) -> &'static str {
        "transpose"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, cols, rows);
        out.assign(&x.t());
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        out.assign(&grad.t());
        Ok(())
    }
}

/// Reshape to a fixed target shape; row-major element order is preserved.
pub(crate) struct Reshape {
    rows: usize,
    cols: usize,
}

impl Op for Reshape {
    fn label(&self) -> &'static str {
        "reshape"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        if x.len() != self.rows * self.cols {
            return Err(GraphError::ShapeMismatch {
                op: "reshape",
                lhs: x.dim(),
                rhs: (self.rows, self.cols),
            });
        }
        tensor::resize(out, self.rows, self.cols);
        for (o, &v) in out.iter_mut().zip(x.iter()) {
            *o = v;
        }
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        for (o, &v) in out.iter_mut().zip(grad.iter()) {
            *o = v;
        }
        Ok(())
    }
}

/// Rectangular block read; backward scatters the gradient into the block.
pub(crate) struct Split {
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
}

impl Op for Split {
    fn label(&self) -> &'static str {
        "split"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (xr, xc) = x.dim();
        if self.row + self.rows > xr || self.col + self.cols > xc {
            return Err(GraphError::ShapeMismatch {
                op: "split",
                lhs: x.dim(),
                rhs: (self.row + self.rows, self.col + self.cols),
            });
        }
        tensor::resize(out, self.rows, self.cols);
        out.assign(&x.slice(ndarray::s![
            self.row..self.row + self.rows,
            self.col..self.col + self.cols
        ]));
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        out.fill(0.0);
        out.slice_mut(ndarray::s![
            self.row..self.row + self.rows,
            self.col..self.col + self.cols
        ])
        .assign(grad);
        Ok(())
    }
}

/// Row-major flat concatenation of two inputs, reshaped to a target shape.
pub(crate) struct Join {
    rows: usize,
    cols: usize,
}

impl Op for Join {
    fn label(&self) -> &'static str {
        "join"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let a = inputs.value(0);
        let b = inputs.value(1);
        if a.len() + b.len() != self.rows * self.cols {
            return Err(GraphError::ShapeMismatch {
                op: "join",
                lhs: (1, a.len() + b.len()),
                rhs: (self.rows, self.cols),
            });
        }
        tensor::resize(out, self.rows, self.cols);
        for (o, &v) in out.iter_mut().zip(a.iter().chain(b.iter())) {
            *o = v;
        }
        Ok(())
    }

    fn pullback(
        &self,
        index: usize,
        grad: &Tensor,
        inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        let offset = if index == 0 { 0 } else { inputs.value(0).len() };
        for (o, &v) in out.iter_mut().zip(grad.iter().skip(offset)) {
            *o = v;
        }
        Ok(())
    }
}

/// Replicates a 1x1, 1xC or Rx1 source across a target's shape. The target
/// input only contributes its shape; no gradient flows into it from here.
pub(crate) struct Broadcast;

impl Op for Broadcast {
    fn label(&self) -> &'static str {
        "broadcast"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let src = inputs.value(0);
        let target = inputs.value(1);
        let (rows, cols) = target.dim();
        let (sr, sc) = src.dim();
        tensor::resize(out, rows, cols);

        if (sr, sc) == (rows, cols) {
            out.assign(src);
        } else if (sr, sc) == (1, 1) {
            out.fill(src[[0, 0]]);
        } else if sr == 1 && sc == cols {
            for mut row in out.rows_mut() {
                row.assign(&src.row(0));
            }
        } else if sc == 1 && sr == rows {
            for (mut col, &v) in out.rows_mut().into_iter().zip(src.column(0)) {
                col.fill(v);
            }
        } else {
            return Err(GraphError::ShapeMismatch {
                op: "broadcast",
                lhs: (sr, sc),
                rhs: (rows, cols),
            });
        }
        Ok(())
    }

    fn pullback(
        &self,
        index: usize,
        grad: &Tensor,
        inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        if index == 1 {
            out.fill(0.0);
            return Ok(());
        }

        let (sr, sc) = inputs.value(0).dim();
        let (rows, cols) = grad.dim();
        if (sr, sc) == (rows, cols) {
            out.assign(grad);
        } else if (sr, sc) == (1, 1) {
            out[[0, 0]] = grad.sum();
        } else if sr == 1 {
            for (o, col) in out.row_mut(0).iter_mut().zip(grad.columns()) {
                *o = col.sum();
            }
        } else {
            for (o, row) in out.column_mut(0).iter_mut().zip(grad.rows()) {
                *o = row.sum();
            }
        }
        Ok(())
    }
}

/// Identity pass-through. Composite builders return one of these so the
/// subgraph has a single stable handle and the outer gradient is routed in
/// without duplication.
pub(crate) struct IDerivative;

impl Op for IDerivative {
    fn label(&self) -> &'static str {
        "iderivative"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);
        out.assign(x);
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        out.assign(grad);
        Ok(())
    }
}

impl Graph {
    pub fn transpose(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Transpose), vec![x])
    }

    pub fn reshape(&mut self, x: NodeId, rows: usize, cols: usize) -> NodeId {
        self.push_op(Box::new(Reshape { rows, cols }), vec![x])
    }

    /// Reads the `rows x cols` block of `x` anchored at `(row, col)`.
    pub fn split(
        &mut self,
        x: NodeId,
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    ) -> NodeId {
        self.push_op(
            Box::new(Split {
                row,
                col,
                rows,
                cols,
            }),
            vec![x],
        )
    }

    /// Concatenates the row-major elements of `a` then `b` into a
    /// `rows x cols` tensor.
    pub fn join(&mut self, a: NodeId, b: NodeId, rows: usize, cols: usize) -> NodeId {
        self.push_op(Box::new(Join { rows, cols }), vec![a, b])
    }

    /// Broadcasts `src` across the shape of `target`.
    pub fn broadcast(&mut self, src: NodeId, target: NodeId) -> NodeId {
        self.push_op(Box::new(Broadcast), vec![src, target])
    }

    pub fn iderivative(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(IDerivative), vec![x])
    }
}
