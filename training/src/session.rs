//! Live graph plus last-synced snapshot, and the weight stream operations
//! between them.

use graph::storage;
use graph::{Graph, Tensor};

use crate::TrainError;

/// Two owned graphs: `curr` is the live model, `prev` holds the weights
/// last received from the master. The difference `curr - prev` is the
/// update a worker pushes.
pub struct Session {
    curr: Graph,
    prev: Graph,
    worker: u32,
}

impl Session {
    pub fn new(worker: u32) -> Self {
        Self {
            curr: Graph::new(),
            prev: Graph::new(),
            worker,
        }
    }

    /// Deterministic graph RNG, for reproducible model initialization.
    pub fn seeded(worker: u32, seed: u64) -> Self {
        Self {
            curr: Graph::seeded(seed),
            prev: Graph::seeded(seed.wrapping_add(1)),
            worker,
        }
    }

    pub fn worker(&self) -> u32 {
        self.worker
    }

    /// The live graph; models build their nodes here.
    pub fn graph(&mut self) -> &mut Graph {
        &mut self.curr
    }

    /// Serializes every `curr` variable in insertion order.
    pub fn get_weights(&self) -> Result<Vec<u8>, TrainError> {
        let tensors: Vec<&Tensor> = self
            .curr
            .variables()
            .iter()
            .map(|&id| self.curr.value(id))
            .collect();
        let mut out = Vec::new();
        storage::write_weights(&tensors, &mut out)?;
        Ok(out)
    }

    /// Loads a serialized weight set into both graphs, growing them with
    /// fresh variables when the stream holds more than they currently do.
    /// Immediately afterwards `get_update` is all zeros.
    pub fn set_weights(&mut self, weights: &[u8]) -> Result<(), TrainError> {
        let tensors = storage::read_weights(&mut &weights[..])?;

        while self.curr.variables().len() < tensors.len() {
            self.curr.empty_variable();
        }
        while self.prev.variables().len() < tensors.len() {
            self.prev.empty_variable();
        }

        for (i, tensor) in tensors.into_iter().enumerate() {
            let curr_id = self.curr.variables()[i];
            let prev_id = self.prev.variables()[i];
            self.curr.load_value(curr_id, tensor.clone());
            self.prev.load_value(prev_id, tensor);
        }
        Ok(())
    }

    /// Serializes `curr[i] - prev[i]` for every variable.
    pub fn get_update(&self) -> Result<Vec<u8>, TrainError> {
        let curr_vars = self.curr.variables();
        let prev_vars = self.prev.variables();
        if curr_vars.len() != prev_vars.len() {
            return Err(TrainError::VariableCountMismatch {
                curr: curr_vars.len(),
                prev: prev_vars.len(),
            });
        }

        let mut out = Vec::new();
        storage::write_int(curr_vars.len() as i32, &mut out)?;
        for (&c, &p) in curr_vars.iter().zip(prev_vars) {
            let delta = self.curr.value(c) - self.prev.value(p);
            storage::write_tensor(&delta, &mut out)?;
        }
        Ok(out)
    }

    /// Adds a serialized delta into the `curr` variables.
    pub fn upd_weights(&mut self, update: &[u8]) -> Result<(), TrainError> {
        let deltas = storage::read_weights(&mut &update[..])?;
        if deltas.len() > self.curr.variables().len() {
            return Err(TrainError::VariableCountMismatch {
                curr: self.curr.variables().len(),
                prev: deltas.len(),
            });
        }
        for (i, delta) in deltas.into_iter().enumerate() {
            let id = self.curr.variables()[i];
            *self.curr.value_mut(id) += &delta;
        }
        Ok(())
    }
}
