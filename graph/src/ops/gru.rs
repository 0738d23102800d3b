//! Single-cell GRU assembled as a subgraph.

use crate::graph::{Graph, NodeId};

/// Handle bundle for a GRU cell: the output node plus the six weight
/// matrices and three biases.
#[derive(Clone, Copy, Debug)]
pub struct GruCell {
    pub node: NodeId,
    pub wz: NodeId,
    pub uz: NodeId,
    pub bz: NodeId,
    pub wr: NodeId,
    pub ur: NodeId,
    pub br: NodeId,
    pub wh: NodeId,
    pub uh: NodeId,
    pub bh: NodeId,
}

impl Graph {
    /// Builds `z = sigmoid(x Wz + h Uz + bz)`, `r = sigmoid(x Wr + h Ur + br)`,
    /// `c = tanh(x Wh + (r (.) h) Uh + bh)` and the new state
    /// `h' = (1 - z) (.) c + z (.) h`.
    ///
    /// `x` is `n x in_size`, `h` is `n x out_size`; the weight shapes are
    /// `W*: in_size x out_size`, `U*: out_size x out_size`,
    /// `b*: 1 x out_size`.
    pub fn gru(&mut self, x: NodeId, h: NodeId, in_size: usize, out_size: usize) -> GruCell {
        let wz = self.variable(in_size, out_size);
        let uz = self.variable(out_size, out_size);
        let bz = self.variable(1, out_size);
        let wr = self.variable(in_size, out_size);
        let ur = self.variable(out_size, out_size);
        let br = self.variable(1, out_size);
        let wh = self.variable(in_size, out_size);
        let uh = self.variable(out_size, out_size);
        let bh = self.variable(1, out_size);

        let z = self.gate(x, h, wz, uz, bz);
        let z = self.sigmoid(z);

        let r = self.gate(x, h, wr, ur, br);
        let r = self.sigmoid(r);

        let rh = self.mul(r, h);
        let xw = self.product(x, wh);
        let ru = self.product(rh, uh);
        let pre = self.add(xw, ru);
        let bias = self.broadcast(bh, pre);
        let pre = self.add(pre, bias);
        let c = self.tanh(pre);

        // h' = (1 - z) (.) c + z (.) h, written as c + z (.) (h - c).
        let hc = self.sub(h, c);
        let zhc = self.mul(z, hc);
        let out = self.add(c, zhc);
        let node = self.iderivative(out);

        GruCell {
            node,
            wz,
            uz,
            bz,
            wr,
            ur,
            br,
            wh,
            uh,
            bh,
        }
    }

    /// `x W + h U + b` with the bias broadcast across rows.
    fn gate(&mut self, x: NodeId, h: NodeId, w: NodeId, u: NodeId, b: NodeId) -> NodeId {
        let xw = self.product(x, w);
        let hu = self.product(h, u);
        let sum = self.add(xw, hu);
        let bias = self.broadcast(b, sum);
        self.add(sum, bias)
    }
}
