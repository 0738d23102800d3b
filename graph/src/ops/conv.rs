//! 2-D convolution over channel-major-row-major row vectors.
//!
//! The input is a `1 x (in_ch * in_rows * in_cols)` vector holding each
//! channel's rows back to back; the output uses the same layout with the
//! output geometry. The kernel is an `(out_ch * k_rows) x (in_ch * k_cols)`
//! matrix: block (o, i) is the `k_rows x k_cols` filter applied to input
//! channel `i` for output channel `o`.

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

#[derive(Clone, Copy, Debug)]
pub(crate) struct ConvShape {
    pub in_rows: usize,
    pub in_cols: usize,
    pub in_ch: usize,
    pub out_ch: usize,
    pub k_rows: usize,
    pub k_cols: usize,
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
}

impl ConvShape {
    pub fn out_rows(&self) -> usize {
        (self.in_rows + 2 * self.pad - self.dilation * (self.k_rows - 1) - 1) / self.stride + 1
    }

    pub fn out_cols(&self) -> usize {
        (self.in_cols + 2 * self.pad - self.dilation * (self.k_cols - 1) - 1) / self.stride + 1
    }

    /// Input row/col touched by kernel tap (kr, kc) at output (or, oc), or
    /// None when the tap lands in the zero padding.
    fn tap(&self, or: usize, oc: usize, kr: usize, kc: usize) -> Option<(usize, usize)> {
        let r = (or * self.stride + kr * self.dilation) as isize - self.pad as isize;
        let c = (oc * self.stride + kc * self.dilation) as isize - self.pad as isize;
        if r < 0 || c < 0 || r >= self.in_rows as isize || c >= self.in_cols as isize {
            return None;
        }
        Some((r as usize, c as usize))
    }
}

pub(crate) struct Conv {
    shape: ConvShape,
}

impl Op for Conv {
    fn label(&self) -> &'static str {
        "conv2d"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let s = self.shape;
        let x = inputs.value(0);
        let k = inputs.value(1);
        if x.dim() != (1, s.in_ch * s.in_rows * s.in_cols)
            || k.dim() != (s.out_ch * s.k_rows, s.in_ch * s.k_cols)
        {
            return Err(GraphError::ShapeMismatch {
                op: "conv2d",
                lhs: x.dim(),
                rhs: k.dim(),
            });
        }

        let (out_rows, out_cols) = (s.out_rows(), s.out_cols());
        tensor::resize(out, 1, s.out_ch * out_rows * out_cols);
        out.fill(0.0);

        for o in 0..s.out_ch {
            for or in 0..out_rows {
                for oc in 0..out_cols {
                    let mut acc = 0.0;
                    for i in 0..s.in_ch {
                        for kr in 0..s.k_rows {
                            for kc in 0..s.k_cols {
                                if let Some((r, c)) = s.tap(or, oc, kr, kc) {
                                    let xv = x[[0, i * s.in_rows * s.in_cols + r * s.in_cols + c]];
                                    let kv = k[[o * s.k_rows + kr, i * s.k_cols + kc]];
                                    acc += xv * kv;
                                }
                            }
                        }
                    }
                    out[[0, o * out_rows * out_cols + or * out_cols + oc]] = acc;
                }
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
        let s = self.shape;
        let (out_rows, out_cols) = (s.out_rows(), s.out_cols());
        out.fill(0.0);

        for o in 0..s.out_ch {
            for or in 0..out_rows {
                for oc in 0..out_cols {
                    let g = grad[[0, o * out_rows * out_cols + or * out_cols + oc]];
                    if g == 0.0 {
                        continue;
                    }
                    for i in 0..s.in_ch {
                        for kr in 0..s.k_rows {
                            for kc in 0..s.k_cols {
                                if let Some((r, c)) = s.tap(or, oc, kr, kc) {
                                    let xi = i * s.in_rows * s.in_cols + r * s.in_cols + c;
                                    if index == 0 {
                                        let kv =
                                            inputs.value(1)[[o * s.k_rows + kr, i * s.k_cols + kc]];
                                        out[[0, xi]] += g * kv;
                                    } else {
                                        let xv = inputs.value(0)[[0, xi]];
                                        out[[o * s.k_rows + kr, i * s.k_cols + kc]] += g * xv;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Handle bundle for a convolution: the output node and the kernel.
#[derive(Clone, Copy, Debug)]
pub struct Conv2d {
    pub node: NodeId,
    pub kernel: NodeId,
}

impl Graph {
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d(
        &mut self,
        x: NodeId,
        in_rows: usize,
        in_cols: usize,
        in_ch: usize,
        out_ch: usize,
        k_rows: usize,
        k_cols: usize,
        stride: usize,
        pad: usize,
        dilation: usize,
    ) -> Conv2d {
        let kernel = self.variable(out_ch * k_rows, in_ch * k_cols);
        let shape = ConvShape {
            in_rows,
            in_cols,
            in_ch,
            out_ch,
            k_rows,
            k_cols,
            stride,
            pad,
            dilation,
        };
        let node = self.push_op(Box::new(Conv { shape }), vec![x, kernel]);
        Conv2d { node, kernel }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use crate::tensor::{self, is_approx};
    use crate::Graph;

    #[test]
    fn test_conv2d_forward_single_channel() {
        let mut g = Graph::seeded(0);
        // 2x3 input flattened row-major.
        let x = g.variable(1, 6);
        g.value_mut(x)
            .assign(&arr2(&[[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]]));

        let c = g.conv2d(x, 2, 3, 1, 1, 2, 2, 1, 1, 2);
        g.value_mut(c.kernel).assign(&arr2(&[[1.0, 2.0], [3.0, 4.0]]));

        let y = g.forward(c.node).unwrap();
        let expected = arr2(&[[20.0, 36.0, 15.0, 4.0, 7.0, 2.0]]);
        assert_eq!(y, &expected);
    }

    #[test]
    fn test_conv2d_forward_multi_channel() {
        let mut g = Graph::seeded(0);
        // Two 2x3 channels flattened back to back.
        let x = g.variable(1, 12);
        g.value_mut(x).assign(&arr2(&[[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0,
        ]]));

        let c = g.conv2d(x, 2, 3, 2, 3, 2, 2, 1, 1, 2);
        g.value_mut(c.kernel).assign(&arr2(&[
            [1.0, 2.0, 5.0, 6.0],
            [3.0, 4.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
            [17.0, 18.0, 19.0, 20.0],
            [21.0, 22.0, 23.0, 24.0],
        ]));

        let y = g.forward(c.node).unwrap();
        let expected = arr2(&[[
            108.0, 202.0, 92.0, 52.0, 96.0, 42.0, // channel 1
            246.0, 478.0, 230.0, 116.0, 224.0, 106.0, // channel 2
            374.0, 734.0, 358.0, 196.0, 384.0, 186.0, // channel 3
        ]]);
        assert_eq!(y, &expected);
    }

    #[test]
    fn test_conv2d_backward_single_channel() {
        let mut g = Graph::seeded(0);
        let x = g.variable(1, 6);
        g.value_mut(x)
            .assign(&arr2(&[[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]]));

        // stride 1, pad 1, dilation 1 -> 3x4 output.
        let c = g.conv2d(x, 2, 3, 1, 1, 2, 2, 1, 1, 1);
        g.value_mut(c.kernel).assign(&arr2(&[[1.0, 2.0], [3.0, 4.0]]));

        g.forward(c.node).unwrap();
        g.backward(c.node, &tensor::ones(1, 12)).unwrap();

        let dk = g.dfdx(c.node, c.kernel).unwrap();
        let dx = g.dfdx(c.node, x).unwrap();
        assert!(is_approx(g.gradient(c.kernel), &dk, 0.01));
        assert!(is_approx(g.gradient(x), &dx, 0.01));
    }

    #[test]
    fn test_conv2d_backward_multi_channel() {
        let mut g = Graph::seeded(0);
        let x = g.variable(1, 12);
        g.value_mut(x).assign(&arr2(&[[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0,
        ]]));

        let c = g.conv2d(x, 2, 3, 2, 3, 2, 2, 1, 1, 2);
        g.value_mut(c.kernel).assign(&arr2(&[
            [1.0, 2.0, 5.0, 6.0],
            [3.0, 4.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 15.0, 16.0],
            [17.0, 18.0, 19.0, 20.0],
            [21.0, 22.0, 23.0, 24.0],
        ]));

        g.forward(c.node).unwrap();
        g.backward(c.node, &tensor::ones(1, 18)).unwrap();

        assert_eq!(g.gradient(c.kernel).dim(), (6, 4));
        assert_eq!(g.gradient(x).dim(), (1, 12));

        let dk = g.dfdx(c.node, c.kernel).unwrap();
        let dx = g.dfdx(c.node, x).unwrap();
        assert!(is_approx(g.gradient(c.kernel), &dk, 0.01));
        assert!(is_approx(g.gradient(x), &dx, 0.01));
    }
}
