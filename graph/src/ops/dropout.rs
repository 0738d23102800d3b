//! Inverted dropout with a per-epoch cached mask.

use ndarray::Zip;

use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

pub(crate) struct Dropout {
    rate: f32,
    mask: Tensor,
}

impl Op for Dropout {
    fn label(&self) -> &'static str {
        "dropout"
    }

    fn forward(&mut self, inputs: &Inputs, rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);

        // Rate zero keeps the RNG untouched.
        if self.rate == 0.0 {
            out.assign(x);
            return Ok(());
        }

        let keep = 1.0 - self.rate;
        tensor::resize(&mut self.mask, rows, cols);
        self.mask
            .mapv_inplace(|_| if rng.uniform(0.0, 1.0) < keep { 1.0 / keep } else { 0.0 });
        Zip::from(out)
            .and(x)
            .and(&self.mask)
            .for_each(|o, &x, &m| *o = x * m);
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        if self.rate == 0.0 {
            out.assign(grad);
            return Ok(());
        }
        Zip::from(out)
            .and(grad)
            .and(&self.mask)
            .for_each(|o, &g, &m| *o = g * m);
        Ok(())
    }
}

impl Graph {
    pub fn dropout(&mut self, x: NodeId, rate: f32) -> NodeId {
        self.push_op(
            Box::new(Dropout {
                rate,
                mask: tensor::empty(),
            }),
            vec![x],
        )
    }
}
