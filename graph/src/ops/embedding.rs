//! Embedding lookup: integer indices (stored as f32) select rows of a
//! trainable table.

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

pub(crate) struct Lookup;

impl Op for Lookup {
    fn label(&self) -> &'static str {
        "embedding"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let indices = inputs.value(0);
        let table = inputs.value(1);
        let (vocab, emb) = table.dim();
        tensor::resize(out, indices.len(), emb);

        for (k, &raw) in indices.iter().enumerate() {
            let row = raw.round() as usize;
            if raw < 0.0 || row >= vocab {
                return Err(GraphError::ShapeMismatch {
                    op: "embedding",
                    lhs: (row, 0),
                    rhs: table.dim(),
                });
            }
            out.row_mut(k).assign(&table.row(row));
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
        out.fill(0.0);
        if index == 0 {
            // Indices are not differentiable.
            return Ok(());
        }
        // Duplicate indices accumulate.
        for (k, &raw) in inputs.value(0).iter().enumerate() {
            let row = raw.round() as usize;
            let mut target = out.row_mut(row);
            target += &grad.row(k);
        }
        Ok(())
    }
}

/// Handle bundle for an embedding lookup: the output node and the table.
#[derive(Clone, Copy, Debug)]
pub struct Embedding {
    pub node: NodeId,
    pub table: NodeId,
}

impl Graph {
    /// Allocates a `vocab x emb` table variable and the lookup node over it.
    pub fn embedding(&mut self, indices: NodeId, vocab: usize, emb: usize) -> Embedding {
        let table = self.variable(vocab, emb);
        let node = self.push_op(Box::new(Lookup), vec![indices, table]);
        Embedding { node, table }
    }
}
