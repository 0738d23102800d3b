use ndarray::Zip;

use super::{sync_state, Optimizer};
use crate::graph::{Graph, NodeId};
use crate::tensor::Tensor;

const ALPHA: f32 = 0.9;
const EPSILON: f32 = 1e-8;

/// RMSProp: `v <- alpha v + (1 - alpha) g^2`,
/// `p <- p - lr * g / sqrt(v + eps)`.
#[derive(Debug)]
pub struct RmsProp {
    variables: Vec<NodeId>,
    learning_rate: f32,
    v: Vec<Tensor>,
}

impl RmsProp {
    pub fn new(variables: Vec<NodeId>, learning_rate: f32) -> Self {
        Self {
            variables,
            learning_rate,
            v: Vec::new(),
        }
    }
}

impl Optimizer for RmsProp {
    fn update(&mut self, graph: &mut Graph) {
        sync_state(&mut self.v, &self.variables, graph);

        let lr = self.learning_rate;
        for (i, &id) in self.variables.iter().enumerate() {
            let (value, grad) = graph.step_parts(id);
            if grad.is_empty() {
                continue;
            }
            Zip::from(value)
                .and(grad)
                .and(&mut self.v[i])
                .for_each(|p, &g, v| {
                    *v = ALPHA * *v + (1.0 - ALPHA) * g * g;
                    *p -= lr * g / (*v + EPSILON).sqrt();
                });
        }
    }
}
