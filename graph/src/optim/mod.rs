//! Optimizers stepping graph variables in place.
//!
//! Every optimizer is constructed from the variable list and allocates its
//! state tensors on the first `update`; after that warm-up step the hot
//! path performs no allocations.

mod adam;
mod rmsprop;
mod sgd;
mod yogi;

pub use adam::{Adam, AdamNC};
pub use rmsprop::RmsProp;
pub use sgd::Sgd;
pub use yogi::Yogi;

use crate::graph::{Graph, NodeId};
use crate::tensor::{self, Tensor};

pub trait Optimizer {
    /// Steps every variable using its accumulated gradient.
    fn update(&mut self, graph: &mut Graph);
}

/// Lazily sizes per-variable state tensors against the variables' current
/// shapes.
fn sync_state(state: &mut Vec<Tensor>, variables: &[NodeId], graph: &Graph) {
    if state.len() < variables.len() {
        state.resize(variables.len(), tensor::empty());
    }
    for (slot, &id) in state.iter_mut().zip(variables) {
        let (rows, cols) = graph.value(id).dim();
        tensor::resize(slot, rows, cols);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    use super::*;
    use crate::tensor;
    use crate::Graph;

    /// One optimizer step over a single known variable/gradient pair.
    fn step_once<O: Optimizer>(opt: &mut O, value: [f32; 2], grad: [f32; 2]) -> (f32, f32) {
        let mut g = Graph::seeded(0);
        let v = g.variable(1, 2);
        g.value_mut(v).assign(&arr2(&[value]));
        g.gradient_mut(v).assign(&arr2(&[grad]));
        opt.update(&mut g);
        let out = g.value(v);
        (out[[0, 0]], out[[0, 1]])
    }

    #[test]
    fn test_sgd_step() {
        let mut g = Graph::seeded(0);
        let v = g.variable(1, 2);
        g.value_mut(v).assign(&arr2(&[[1.0, -2.0]]));
        g.gradient_mut(v).assign(&arr2(&[[0.5, -1.0]]));

        let mut opt = Sgd::new(g.variables().to_vec(), 0.1);
        opt.update(&mut g);

        assert_eq!(g.value(v), &arr2(&[[0.95, -1.9]]));
    }

    #[test]
    fn test_adam_first_step_is_learning_rate_sized() {
        let mut opt = Adam::new(vec![crate::NodeId(0)], 0.01);
        // With bias correction the first step is ~lr * sign(g).
        let (a, b) = step_once(&mut opt, [1.0, 1.0], [3.0, -7.0]);
        assert_abs_diff_eq!(a, 1.0 - 0.01, epsilon = 1e-4);
        assert_abs_diff_eq!(b, 1.0 + 0.01, epsilon = 1e-4);
    }

    #[test]
    fn test_adamnc_first_step_is_uncorrected() {
        let mut opt = AdamNC::new(vec![crate::NodeId(0)], 0.01);
        // Without bias correction the first step is
        // lr * (0.1 g) / (sqrt(0.001 g^2) + eps) ~ lr * sqrt(10).
        let (a, _) = step_once(&mut opt, [1.0, 1.0], [3.0, -7.0]);
        let expected = 1.0 - 0.01 * 0.1 * 3.0 / ((0.001f32 * 9.0).sqrt() + 1e-8);
        assert_abs_diff_eq!(a, expected, epsilon = 1e-4);
    }

    #[test]
    fn test_rmsprop_step() {
        let mut opt = RmsProp::new(vec![crate::NodeId(0)], 0.01);
        let (a, _) = step_once(&mut opt, [1.0, 1.0], [2.0, -2.0]);
        // v = 0.1 * 4, step = lr * 2 / sqrt(0.4 + eps)
        let expected = 1.0 - 0.01 * 2.0 / (0.4f32 + 1e-8).sqrt();
        assert_abs_diff_eq!(a, expected, epsilon = 1e-4);
    }

    #[test]
    fn test_yogi_second_moment_sign_update() {
        let mut g = Graph::seeded(0);
        let v = g.variable(1, 1);
        g.value_mut(v).assign(&arr2(&[[1.0]]));
        g.gradient_mut(v).assign(&arr2(&[[2.0]]));

        let mut opt = Yogi::new(g.variables().to_vec(), 0.01);
        opt.update(&mut g);
        let first = g.value(v)[[0, 0]];
        assert!(first < 1.0);

        // Second step with the same gradient keeps shrinking the value.
        g.gradient_mut(v).assign(&arr2(&[[2.0]]));
        opt.update(&mut g);
        assert!(g.value(v)[[0, 0]] < first);
    }

    #[test]
    fn test_optimizer_state_is_allocated_once() {
        let mut g = Graph::seeded(0);
        let v = g.variable(4, 4);
        g.gradient_mut(v).fill(0.5);

        let mut opt = Adam::new(g.variables().to_vec(), 0.01);
        opt.update(&mut g);
        let before = g.value(v).as_ptr();
        for _ in 0..5 {
            opt.update(&mut g);
        }
        assert_eq!(g.value(v).as_ptr(), before);
    }

    #[test]
    fn test_update_skips_unsized_gradients() {
        let mut g = Graph::seeded(0);
        let v = g.empty_variable();
        g.load_value(v, tensor::full(1, 2, 3.0));
        let mut opt = Sgd::new(g.variables().to_vec(), 0.1);
        g.zero_grad();
        opt.update(&mut g);
        assert_eq!(g.value(v), &tensor::full(1, 2, 3.0));
    }
}
