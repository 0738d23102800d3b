//! Matrix product and the fused linear layer.

use ndarray::linalg::general_mat_mul;

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

pub(crate) struct Product;

impl Op for Product {
    fn label(&self) -> &'static str {
        "product"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let a = inputs.value(0);
        let b = inputs.value(1);
        if a.ncols() != b.nrows() {
            return Err(GraphError::ShapeMismatch {
                op: "product",
                lhs: a.dim(),
                rhs: b.dim(),
            });
        }
        tensor::resize(out, a.nrows(), b.ncols());
        general_mat_mul(1.0, a, b, 0.0, out);
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
        if index == 0 {
            // dL/dA = g . B^T
            general_mat_mul(1.0, grad, &inputs.value(1).t(), 0.0, out);
        } else {
            // dL/dB = A^T . g
            general_mat_mul(1.0, &inputs.value(0).t(), grad, 0.0, out);
        }
        Ok(())
    }
}

/// `y = x . W^T + b` with W: (out, in) and b: (1, out), applied per row.
pub(crate) struct LinearOp;

impl Op for LinearOp {
    fn label(&self) -> &'static str {
        "linear"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let w = inputs.value(1);
        let b = inputs.value(2);
        if x.ncols() != w.ncols() || b.dim() != (1, w.nrows()) {
            return Err(GraphError::ShapeMismatch {
                op: "linear",
                lhs: x.dim(),
                rhs: w.dim(),
            });
        }
        tensor::resize(out, x.nrows(), w.nrows());
        general_mat_mul(1.0, x, &w.t(), 0.0, out);
        for mut row in out.rows_mut() {
            row += &b.row(0);
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
        match index {
            // dL/dx = g . W
            0 => general_mat_mul(1.0, grad, inputs.value(1), 0.0, out),
            // dL/dW = g^T . x
            1 => general_mat_mul(1.0, &grad.t(), inputs.value(0), 0.0, out),
            // dL/db = column sums of g
            _ => {
                for (o, col) in out.row_mut(0).iter_mut().zip(grad.columns()) {
                    *o = col.sum();
                }
            }
        }
        Ok(())
    }
}

/// Handle bundle for a linear layer: the output node plus its parameters.
#[derive(Clone, Copy, Debug)]
pub struct Linear {
    pub node: NodeId,
    pub w: NodeId,
    pub b: NodeId,
}

impl Graph {
    pub fn product(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Product), vec![a, b])
    }

    /// Allocates W: (out, in) and b: (1, out) variables and the node
    /// computing `x . W^T + b`.
    pub fn linear(&mut self, x: NodeId, in_size: usize, out_size: usize) -> Linear {
        let w = self.variable(out_size, in_size);
        let b = self.variable(1, out_size);
        let node = self.push_op(Box::new(LinearOp), vec![x, w, b]);
        Linear { node, w, b }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use crate::tensor::{self, is_approx};
    use crate::Graph;

    #[test]
    fn test_product_forward() {
        let mut g = Graph::seeded(0);
        let a = g.variable(4, 3);
        g.value_mut(a).assign(&arr2(&[
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [10.0, 11.0, 12.0],
        ]));
        let b = g.constant(3, 2);
        g.value_mut(b)
            .assign(&arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]));
        let y = g.product(a, b);

        let expected = arr2(&[
            [22.0, 28.0],
            [49.0, 64.0],
            [76.0, 100.0],
            [103.0, 136.0],
        ]);
        assert_eq!(g.forward(y).unwrap(), &expected);
    }

    #[test]
    fn test_product_matrix_vector() {
        let mut g = Graph::seeded(0);
        let u = g.constant(4, 4);
        g.value_mut(u).assign(&arr2(&[
            [3.0, -2.0, 1.0, -3.0],
            [6.0, 5.0, -4.0, 2.0],
            [9.0, -8.0, 7.0, -2.0],
            [-9.0, 11.0, -10.0, -3.0],
        ]));
        let h = g.constant(4, 1);
        g.value_mut(h).assign(&arr2(&[
            [0.00293178],
            [-0.0170642],
            [0.00199824],
            [-0.000237697],
        ]));
        let uh = g.product(u, h);

        let expected = arr2(&[[0.0456], [-0.0762], [0.1774], [-0.2334]]);
        assert!(is_approx(g.forward(uh).unwrap(), &expected, 0.001));
    }

    #[test]
    fn test_product_backward() {
        let mut g = Graph::seeded(0);
        let a = g.variable(4, 3);
        g.value_mut(a).assign(&arr2(&[
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [10.0, 11.0, 12.0],
        ]));
        let b = g.variable(3, 2);
        g.value_mut(b)
            .assign(&arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]));
        let y = g.product(a, b);

        g.forward(y).unwrap();
        g.backward(y, &tensor::ones(4, 2)).unwrap();

        let dyda = g.dfdx(y, a).unwrap();
        let dydb = g.dfdx(y, b).unwrap();
        assert!(is_approx(g.gradient(a), &dyda, 0.01));
        assert!(is_approx(g.gradient(b), &dydb, 0.01));
    }

    #[test]
    fn test_linear_forward() {
        let mut g = Graph::seeded(0);
        let x = g.constant(2, 3);
        g.value_mut(x)
            .assign(&arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        let y = g.linear(x, 3, 4);

        assert_eq!(g.value(y.w).dim(), (4, 3));
        assert_eq!(g.value(y.b).dim(), (1, 4));

        g.value_mut(y.w).assign(&arr2(&[
            [0.5210, -0.3797, 0.2674],
            [-0.5357, -0.1399, 0.0647],
            [0.3203, 0.0407, -0.3343],
            [0.2107, -0.1692, 0.5243],
        ]));
        g.value_mut(y.b)
            .assign(&arr2(&[[0.3992, 0.3767, 0.5552, -0.2610]]));

        let expected = arr2(&[
            [0.9630, -0.2447, -0.0460, 1.1842],
            [2.1891, -2.0774, 0.0341, 2.8816],
        ]);
        assert!(is_approx(g.forward(y.node).unwrap(), &expected, 0.0001));
    }

    #[test]
    fn test_linear_backward() {
        let mut g = Graph::seeded(0);
        let x = g.variable(2, 3);
        g.value_mut(x)
            .assign(&arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        let y = g.linear(x, 3, 4);
        g.value_mut(y.w).assign(&arr2(&[
            [0.5210, -0.3797, 0.2674],
            [-0.5357, -0.1399, 0.0647],
            [0.3203, 0.0407, -0.3343],
            [0.2107, -0.1692, 0.5243],
        ]));
        g.value_mut(y.b)
            .assign(&arr2(&[[0.3992, 0.3767, 0.5552, -0.2610]]));

        g.forward(y.node).unwrap();
        g.backward(y.node, &tensor::ones(2, 4)).unwrap();

        let dw = g.dfdx(y.node, y.w).unwrap();
        let db = g.dfdx(y.node, y.b).unwrap();
        let dx = g.dfdx(y.node, x).unwrap();
        assert!(is_approx(g.gradient(y.w), &dw, 0.01));
        assert!(is_approx(g.gradient(y.b), &db, 0.01));
        assert!(is_approx(g.gradient(x), &dx, 0.01));
    }

    #[test]
    fn test_stacked_linear_layers() {
        let mut g = Graph::seeded(0);
        let x1 = g.variable(1, 4);
        g.value_mut(x1).assign(&arr2(&[[1.0, 2.0, 3.0, 4.0]]));

        let x2 = g.linear(x1, 4, 3);
        g.value_mut(x2.w).assign(&arr2(&[
            [1.0, 2.0, 3.0, 4.0],
            [5.0, 6.0, 7.0, 8.0],
            [9.0, 10.0, 11.0, 12.0],
        ]));
        g.value_mut(x2.b).assign(&arr2(&[[1.0, 2.0, 3.0]]));

        let y2 = g.linear(x2.node, 3, 2);
        g.value_mut(y2.w)
            .assign(&arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]));
        g.value_mut(y2.b).assign(&arr2(&[[1.0, 2.0]]));

        assert_eq!(
            g.forward(x2.node).unwrap(),
            &arr2(&[[31.0, 72.0, 113.0]])
        );
        assert_eq!(g.forward(y2.node).unwrap(), &arr2(&[[515.0, 1164.0]]));

        g.backward(y2.node, &tensor::ones(1, 2)).unwrap();
        let dx1 = g.dfdx(y2.node, x1).unwrap();
        let dw1 = g.dfdx(y2.node, x2.w).unwrap();
        let db1 = g.dfdx(y2.node, x2.b).unwrap();
        assert!(is_approx(g.gradient(x1), &dx1, 0.01));
        assert!(is_approx(g.gradient(x2.w), &dw1, 0.01));
        assert!(is_approx(g.gradient(x2.b), &db1, 0.01));
    }
}
