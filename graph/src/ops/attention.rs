//! Scaled dot-product and multi-head attention, assembled as subgraphs.

use crate::error::GraphError;
use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

/// Converts an attention mask into an additive bias: negative infinity
/// where the mask is zero, zero elsewhere. Gradient flow stops here.
pub(crate) struct MaskBias;

impl Op for MaskBias {
    fn label(&self) -> &'static str {
        "mask_bias"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let mask = inputs.value(0);
        let (rows, cols) = mask.dim();
        tensor::resize(out, rows, cols);
        ndarray::Zip::from(out).and(mask).for_each(|o, &m| {
            *o = if m == 0.0 { f32::NEG_INFINITY } else { 0.0 };
        });
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        _grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        out.fill(0.0);
        Ok(())
    }
}

/// Handle bundle for multi-head attention: the output node plus the four
/// projection matrices and their optional biases.
#[derive(Clone, Copy, Debug)]
pub struct MultiHeadAttention {
    pub node: NodeId,
    pub wq: NodeId,
    pub wk: NodeId,
    pub wv: NodeId,
    pub wo: NodeId,
    pub bq: Option<NodeId>,
    pub bk: Option<NodeId>,
    pub bv: Option<NodeId>,
    pub bo: Option<NodeId>,
}

impl Graph {
    /// `softmax_row((q k^T) / sqrt(head_size) + bias) v`, where `bias` is
    /// negative infinity wherever `mask == 0`. Optional dropout is applied
    /// to the attention matrix before the value product.
    ///
    /// `q` is `trg_size x head_size`, `k` and `v` are
    /// `seq_size x head_size`.
    #[allow(clippy::too_many_arguments)]
    pub fn scaled_dot_attention(
        &mut self,
        q: NodeId,
        k: NodeId,
        v: NodeId,
        mask: Option<NodeId>,
        trg_size: usize,
        seq_size: usize,
        head_size: usize,
        dropout: f32,
    ) -> NodeId {
        let kt = self.transpose(k);
        let scores = self.product(q, kt);

        let scale = self.constant(trg_size, seq_size);
        self.value_mut(scale)
            .fill(1.0 / (head_size as f32).sqrt());
        let mut att = self.mul(scores, scale);

        if let Some(mask) = mask {
            let bias = self.push_op(Box::new(MaskBias), vec![mask]);
            self.set_backprop(bias, false);
            att = self.add(att, bias);
        }

        att = self.softmax(att);
        if dropout > 0.0 {
            att = self.dropout(att, dropout);
        }

        let out = self.product(att, v);
        self.iderivative(out)
    }

    /// Multi-head attention over `emb_size` features with `num_heads` heads
    /// of width `emb_size / num_heads` each. Requires
    /// `emb_size % num_heads == 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn multi_head_attention(
        &mut self,
        q: NodeId,
        k: NodeId,
        v: NodeId,
        mask: Option<NodeId>,
        trg_size: usize,
        seq_size: usize,
        emb_size: usize,
        num_heads: usize,
        bias: bool,
        dropout: f32,
    ) -> Result<MultiHeadAttention> {
        if num_heads == 0 || emb_size % num_heads != 0 {
            return Err(GraphError::ShapeMismatch {
                op: "multi_head_attention",
                lhs: (emb_size, num_heads),
                rhs: (emb_size, 0),
            });
        }
        let head_size = emb_size / num_heads;

        let wq = self.variable(emb_size, emb_size);
        let wk = self.variable(emb_size, emb_size);
        let wv = self.variable(emb_size, emb_size);
        let wo = self.variable(emb_size, emb_size);
        let bq = bias.then(|| self.variable(1, emb_size));
        let bk = bias.then(|| self.variable(1, emb_size));
        let bv = bias.then(|| self.variable(1, emb_size));
        let bo = bias.then(|| self.variable(1, emb_size));

        let qp = self.project(q, wq, bq);
        let kp = self.project(k, wk, bk);
        let vp = self.project(v, wv, bv);

        let mut heads = Vec::with_capacity(num_heads);
        for i in 0..num_heads {
            let qh = self.split(qp, 0, i * head_size, trg_size, head_size);
            let kh = self.split(kp, 0, i * head_size, seq_size, head_size);
            let vh = self.split(vp, 0, i * head_size, seq_size, head_size);
            heads.push(self.scaled_dot_attention(
                qh, kh, vh, mask, trg_size, seq_size, head_size, dropout,
            ));
        }

        let joined = self.join_heads(&heads, trg_size, head_size);
        let out = self.project(joined, wo, bo);
        let node = self.iderivative(out);

        Ok(MultiHeadAttention {
            node,
            wq,
            wk,
            wv,
            wo,
            bq,
            bk,
            bv,
            bo,
        })
    }

    /// `x W^T (+ b)` built from primitive nodes.
    fn project(&mut self, x: NodeId, w: NodeId, b: Option<NodeId>) -> NodeId {
        let wt = self.transpose(w);
        let y = self.product(x, wt);
        match b {
            Some(b) => {
                let bias = self.broadcast(b, y);
                self.add(y, bias)
            }
            None => y,
        }
    }

    /// Concatenates `trg_size x head_size` heads along the feature
    /// dimension. Join is a row-major flat concatenation, so each head is
    /// transposed, stacked and the stack transposed back.
    fn join_heads(&mut self, heads: &[NodeId], trg_size: usize, head_size: usize) -> NodeId {
        let mut joined = self.transpose(heads[0]);
        for (i, &head) in heads.iter().enumerate().skip(1) {
            let ht = self.transpose(head);
            joined = self.join(joined, ht, (i + 1) * head_size, trg_size);
        }
        self.transpose(joined)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use crate::tensor::{self, is_approx};
    use crate::Graph;

    /// Plain-tensor reference for single-head attention without mask.
    fn reference_attention(
        q: &crate::Tensor,
        k: &crate::Tensor,
        v: &crate::Tensor,
    ) -> crate::Tensor {
        let scale = 1.0 / (k.ncols() as f32).sqrt();
        let scores = q.dot(&k.t()) * scale;
        let mut soft = scores.clone();
        for mut row in soft.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|z| (z - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|z| z / sum);
        }
        soft.dot(v)
    }

    #[test]
    fn test_scaled_dot_attention_forward() {
        let mut g = Graph::seeded(0);
        let q = g.constant(2, 3);
        let k = g.constant(4, 3);
        let v = g.constant(4, 3);
        g.value_mut(q)
            .assign(&arr2(&[[1.0, 0.5, -1.0], [0.0, 2.0, 0.5]]));
        g.value_mut(k).assign(&arr2(&[
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ]));
        g.value_mut(v).assign(&arr2(&[
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [10.0, 11.0, 12.0],
        ]));

        let att = g.scaled_dot_attention(q, k, v, None, 2, 4, 3, 0.0);

        let expected = reference_attention(g.value(q), g.value(k), g.value(v));
        assert!(is_approx(g.forward(att).unwrap(), &expected, 1e-4));
    }

    #[test]
    fn test_scaled_dot_attention_mask_blocks_positions() {
        let mut g = Graph::seeded(0);
        let q = g.constant(1, 2);
        g.value_mut(q).assign(&arr2(&[[1.0, 1.0]]));
        let k = g.constant(3, 2);
        g.value_mut(k)
            .assign(&arr2(&[[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]));
        let v = g.constant(3, 2);
        g.value_mut(v)
            .assign(&arr2(&[[1.0, 0.0], [0.0, 1.0], [100.0, 100.0]]));

        let mask = g.constant(1, 3);
        g.value_mut(mask).assign(&arr2(&[[1.0, 1.0, 0.0]]));

        let att = g.scaled_dot_attention(q, k, v, Some(mask), 1, 3, 2, 0.0);
        let out = g.forward(att).unwrap();

        // The masked third position must contribute nothing.
        assert!(out.iter().all(|&v| v <= 1.0));
        assert!((out.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_scaled_dot_attention_backward_matches_numerical() {
        let mut g = Graph::seeded(0);
        let q = g.variable(2, 2);
        let k = g.variable(3, 2);
        let v = g.variable(3, 2);
        g.value_mut(q).assign(&arr2(&[[0.5, -0.2], [0.1, 0.9]]));
        g.value_mut(k)
            .assign(&arr2(&[[0.3, 0.1], [-0.4, 0.8], [0.2, -0.6]]));
        g.value_mut(v)
            .assign(&arr2(&[[1.0, -1.0], [0.5, 0.25], [-0.75, 2.0]]));

        let att = g.scaled_dot_attention(q, k, v, None, 2, 3, 2, 0.0);

        g.forward(att).unwrap();
        g.backward(att, &tensor::ones(2, 2)).unwrap();

        let dq = g.dfdx(att, q).unwrap();
        let dk = g.dfdx(att, k).unwrap();
        let dv = g.dfdx(att, v).unwrap();
        assert!(is_approx(g.gradient(q), &dq, 0.02));
        assert!(is_approx(g.gradient(k), &dk, 0.02));
        assert!(is_approx(g.gradient(v), &dv, 0.02));
    }

    #[test]
    fn test_multi_head_attention_single_head_matches_reference() {
        let mut g = Graph::seeded(0);
        let e = 4;
        let s = 3;

        let x = g.constant(s, e);
        *g.value_mut(x) = tensor::randu(s, e, &mut crate::rng::Rng::seeded(8));

        let mha = g
            .multi_head_attention(x, x, x, None, s, s, e, 1, false, 0.0)
            .unwrap();

        // With Wq = Wk = Wv = Wo = I and one head, MHA reduces to plain
        // scaled dot-product self-attention.
        *g.value_mut(mha.wq) = tensor::eye(e);
        *g.value_mut(mha.wk) = tensor::eye(e);
        *g.value_mut(mha.wv) = tensor::eye(e);
        *g.value_mut(mha.wo) = tensor::eye(e);

        let expected = reference_attention(g.value(x), g.value(x), g.value(x));
        assert!(is_approx(g.forward(mha.node).unwrap(), &expected, 1e-4));
    }

    #[test]
    fn test_multi_head_attention_heads_use_head_width_scaling() {
        let mut g = Graph::seeded(0);
        let e = 4;
        let s = 2;

        let x = g.constant(s, e);
        g.value_mut(x)
            .assign(&arr2(&[[1.0, 2.0, 3.0, 4.0], [0.5, -0.5, 1.5, -1.5]]));

        let mha = g
            .multi_head_attention(x, x, x, None, s, s, e, 2, false, 0.0)
            .unwrap();
        *g.value_mut(mha.wq) = tensor::eye(e);
        *g.value_mut(mha.wk) = tensor::eye(e);
        *g.value_mut(mha.wv) = tensor::eye(e);
        *g.value_mut(mha.wo) = tensor::eye(e);

        // Each head attends over its own half with 1/sqrt(E/H) scaling.
        let xv = g.value(x).clone();
        let left = xv.slice(ndarray::s![.., 0..2]).to_owned();
        let right = xv.slice(ndarray::s![.., 2..4]).to_owned();
        let head0 = reference_attention(&left, &left, &left);
        let head1 = reference_attention(&right, &right, &right);

        let mut expected = tensor::zeros(s, e);
        expected.slice_mut(ndarray::s![.., 0..2]).assign(&head0);
        expected.slice_mut(ndarray::s![.., 2..4]).assign(&head1);

        assert!(is_approx(g.forward(mha.node).unwrap(), &expected, 1e-4));
    }

    #[test]
    fn test_multi_head_attention_rejects_indivisible_heads() {
        let mut g = Graph::seeded(0);
        let x = g.constant(2, 5);
        assert!(g
            .multi_head_attention(x, x, x, None, 2, 2, 5, 2, true, 0.0)
            .is_err());
    }

    #[test]
    fn test_multi_head_attention_backward_matches_numerical() {
        let mut g = Graph::seeded(1);
        let e = 4;
        let s = 2;

        let x = g.variable(s, e);
        g.value_mut(x)
            .assign(&arr2(&[[0.1, 0.2, -0.3, 0.4], [-0.2, 0.3, 0.1, -0.1]]));

        let mha = g
            .multi_head_attention(x, x, x, None, s, s, e, 2, true, 0.0)
            .unwrap();

        g.forward(mha.node).unwrap();
        g.backward(mha.node, &tensor::ones(s, e)).unwrap();

        let dx = g.dfdx(mha.node, x).unwrap();
        let dwq = g.dfdx(mha.node, mha.wq).unwrap();
        let dwo = g.dfdx(mha.node, mha.wo).unwrap();
        assert!(is_approx(g.gradient(x), &dx, 0.02));
        assert!(is_approx(g.gradient(mha.wq), &dwq, 0.02));
        assert!(is_approx(g.gradient(mha.wo), &dwo, 0.02));
    }
}
