//! Per-row layer normalization with trainable affine parameters.

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

const EPS: f32 = 1e-8;

/// `y = A (.) (x - mean_row) / sqrt(var_row + eps) + B` with A, B of shape
/// (1, cols) broadcast across rows. The normalized input and the reciprocal
/// standard deviations are cached for the backward pass.
pub(crate) struct Norm {
    xhat: Tensor,
    inv_std: Tensor,
}

impl Op for Norm {
    fn label(&self) -> &'static str {
        "layer_norm"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let a = inputs.value(1);
        let b = inputs.value(2);
        let (rows, cols) = x.dim();
        if a.dim() != (1, cols) || b.dim() != (1, cols) {
            return Err(GraphError::ShapeMismatch {
                op: "layer_norm",
                lhs: x.dim(),
                rhs: a.dim(),
            });
        }

        tensor::resize(out, rows, cols);
        tensor::resize(&mut self.xhat, rows, cols);
        tensor::resize(&mut self.inv_std, rows, 1);

        for r in 0..rows {
            let row = x.row(r);
            let mean = row.sum() / cols as f32;
            let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / cols as f32;
            let inv = 1.0 / (var + EPS).sqrt();
            self.inv_std[[r, 0]] = inv;

            let mut xhat = self.xhat.row_mut(r);
            let mut o = out.row_mut(r);
            for c in 0..cols {
                xhat[c] = (row[c] - mean) * inv;
                o[c] = a[[0, c]] * xhat[c] + b[[0, c]];
            }
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
        let a = inputs.value(1);
        let (rows, cols) = grad.dim();

        match index {
            0 => {
                for r in 0..rows {
                    let inv = self.inv_std[[r, 0]];
                    let xhat = self.xhat.row(r);
                    let g = grad.row(r);

                    let mut sum_gy = 0.0;
                    let mut sum_gy_xhat = 0.0;
                    for c in 0..cols {
                        let gy = g[c] * a[[0, c]];
                        sum_gy += gy;
                        sum_gy_xhat += gy * xhat[c];
                    }
                    let mean_gy = sum_gy / cols as f32;
                    let mean_gy_xhat = sum_gy_xhat / cols as f32;

                    let mut o = out.row_mut(r);
                    for c in 0..cols {
                        let gy = g[c] * a[[0, c]];
                        o[c] = inv * (gy - mean_gy - xhat[c] * mean_gy_xhat);
                    }
                }
            }
            1 => {
                for c in 0..cols {
                    out[[0, c]] = (0..rows)
                        .map(|r| grad[[r, c]] * self.xhat[[r, c]])
                        .sum();
                }
            }
            _ => {
                for c in 0..cols {
                    out[[0, c]] = (0..rows).map(|r| grad[[r, c]]).sum();
                }
            }
        }
        Ok(())
    }
}

/// Handle bundle for a layer norm: the output node plus scale and shift.
#[derive(Clone, Copy, Debug)]
pub struct LayerNorm {
    pub node: NodeId,
    pub a: NodeId,
    pub b: NodeId,
}

impl Graph {
    /// Allocates scale (ones) and shift (zeros) variables of shape
    /// `1 x cols` and the per-row normalization node.
    pub fn layer_norm(&mut self, x: NodeId, cols: usize) -> LayerNorm {
        let a = self.variable(1, cols);
        self.value_mut(a).fill(1.0);
        let b = self.variable(1, cols);
        self.value_mut(b).fill(0.0);
        let node = self.push_op(
            Box::new(Norm {
                xhat: tensor::empty(),
                inv_std: tensor::empty(),
            }),
            vec![x, a, b],
        );
        LayerNorm { node, a, b }
    }
}
