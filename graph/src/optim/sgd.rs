use ndarray::Zip;

use super::Optimizer;
use crate::graph::{Graph, NodeId};

/// Plain stochastic gradient descent: `v <- v - lr * g`.
#[derive(Debug)]
pub struct Sgd {
    variables: Vec<NodeId>,
    learning_rate: f32,
}

impl Sgd {
    pub fn new(variables: Vec<NodeId>, learning_rate: f32) -> Self {
        Self {
            variables,
            learning_rate,
        }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, graph: &mut Graph) {
        let lr = self.learning_rate;
        for &id in &self.variables {
            let (value, grad) = graph.step_parts(id);
            if grad.is_empty() {
                continue;
            }
            Zip::from(value).and(grad).for_each(|v, &g| *v -= lr * g);
        }
    }
}
