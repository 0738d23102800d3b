//! Reductions producing 1x1 outputs.

use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

pub(crate) struct Sum;

impl Op for Sum {
    fn label(&self) -> &'static str {
        "sum"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        tensor::resize(out, 1, 1);
        out[[0, 0]] = inputs.value(0).sum();
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
        out.fill(grad[[0, 0]]);
        Ok(())
    }
}

pub(crate) struct Mean;

impl Op for Mean {
    fn label(&self) -> &'static str {
        "mean"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        tensor::resize(out, 1, 1);
        out[[0, 0]] = x.sum() / x.len() as f32;
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        out.fill(grad[[0, 0]] / inputs.value(0).len() as f32);
        Ok(())
    }
}

impl Graph {
    pub fn sum(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Sum), vec![x])
    }

    pub fn mean(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Mean), vec![x])
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use crate::tensor::{self, is_approx};
    use crate::Graph;

    #[test]
    fn test_sum_forward_and_backward() {
        let mut g = Graph::seeded(0);
        let z = g.variable(4, 1);
        g.value_mut(z).assign(&arr2(&[[0.0], [1.0], [2.0], [3.0]]));
        let y = g.sum(z);

        assert_eq!(g.forward(y).unwrap()[[0, 0]], 6.0);

        g.backward(y, &tensor::ones(1, 1)).unwrap();
        let numerical = g.dfdx(y, z).unwrap();
        assert!(is_approx(g.gradient(z), &numerical, 0.01));
    }

    #[test]
    fn test_mean_forward_and_backward() {
        let mut g = Graph::seeded(0);
        let z = g.variable(5, 1);
        g.value_mut(z)
            .assign(&arr2(&[[-2.0], [-1.0], [0.0], [1.0], [3.0]]));
        let y = g.mean(z);

        assert_eq!(g.forward(y).unwrap()[[0, 0]], 0.2);

        g.backward(y, &tensor::ones(1, 1)).unwrap();
        let numerical = g.dfdx(y, z).unwrap();
        assert!(is_approx(g.gradient(z), &numerical, 0.01));
    }
}
