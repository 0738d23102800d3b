//! The operator set: one small [`crate::Op`] implementation per node kind,
//! plus composite builders that assemble subgraphs (GRU, attention,
//! rowwise).

mod attention;
mod conv;
mod dropout;
mod elementwise;
mod embedding;
mod gru;
mod matrix;
mod norm;
mod prob;
mod reduce;
mod rowwise;
mod shape;

pub use attention::MultiHeadAttention;
pub use conv::Conv2d;
pub use embedding::Embedding;
pub use gru::GruCell;
pub use matrix::Linear;
pub use norm::LayerNorm;

use crate::error::GraphError;
use crate::graph::Result;
use crate::tensor::Tensor;

pub(crate) fn check_same(op: &'static str, a: &Tensor, b: &Tensor) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(GraphError::ShapeMismatch {
            op,
            lhs: a.dim(),
            rhs: b.dim(),
        });
    }
    Ok(())
}
