//! Computation graph over dense `f32` matrices with reverse-mode autodiff.
//!
//! A [`Graph`] owns every node in an arena and drives forward evaluation and
//! gradient propagation. Models are built through the factory methods on
//! [`Graph`]; trainable parameters are stepped in place by the optimizers in
//! [`optim`]; the [`storage`] codec serializes weights for the distributed
//! layer.

mod error;
mod graph;
pub mod numeric;
pub mod ops;
pub mod optim;
pub mod rng;
pub mod storage;
pub mod tensor;

pub use error::GraphError;
pub use graph::{Graph, Inputs, NodeId, Op, Result};
pub use tensor::Tensor;
