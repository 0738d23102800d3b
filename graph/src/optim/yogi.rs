use ndarray::Zip;

use super::{sync_state, Optimizer};
use crate::graph::{Graph, NodeId};
use crate::tensor::Tensor;

const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-8;

/// Yogi: Adam with an additive, sign-controlled second-moment update
/// `v <- v - (1 - beta2) * sign(v - g^2) * g^2`, which slows the effective
/// learning-rate decay.
#[derive(Debug)]
pub struct Yogi {
    variables: Vec<NodeId>,
    learning_rate: f32,
    beta1_t: f32,
    beta2_t: f32,
    m: Vec<Tensor>,
    v: Vec<Tensor>,
}

impl Yogi {
    pub fn new(variables: Vec<NodeId>, learning_rate: f32) -> Self {
        Self {
            variables,
            learning_rate,
            beta1_t: 1.0,
            beta2_t: 1.0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }
}

impl Optimizer for Yogi {
    fn update(&mut self, graph: &mut Graph) {
        sync_state(&mut self.m, &self.variables, graph);
        sync_state(&mut self.v, &self.variables, graph);

        self.beta1_t *= BETA1;
        self.beta2_t *= BETA2;
        let step_size =
            self.learning_rate * (1.0 - self.beta2_t).sqrt() / (1.0 - self.beta1_t);

        for (i, &id) in self.variables.iter().enumerate() {
            let (value, grad) = graph.step_parts(id);
            if grad.is_empty() {
                continue;
            }
            Zip::from(value)
                .and(grad)
                .and(&mut self.m[i])
                .and(&mut self.v[i])
                .for_each(|p, &g, m, v| {
                    let g2 = g * g;
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v -= (1.0 - BETA2) * (*v - g2).signum() * g2;
                    *p -= step_size * *m / (v.sqrt() + EPSILON);
                });
        }
    }
}
