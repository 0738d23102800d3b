//! Probabilistic operators: row-wise softmax family, gaussian densities and
//! the reparameterized sampler.

use ndarray::Zip;

use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

use super::check_same;

const LN_SQRT_2PI: f32 = 0.918_938_5;
const SQRT_2PI: f32 = 2.506_628_3;

/// Numerically stable row-wise softmax.
pub(crate) struct Softmax;

impl Op for Softmax {
    fn label(&self) -> &'static str {
        "softmax"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);

        for (mut o, row) in out.rows_mut().into_iter().zip(x.rows()) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let mut sum = 0.0;
            for (o, &v) in o.iter_mut().zip(row) {
                *o = (v - max).exp();
                sum += *o;
            }
            o.mapv_inplace(|v| v / sum);
        }
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        // Per row: dL/dz = (g - (g . y)) (.) y
        for ((mut o, g), y) in out
            .rows_mut()
            .into_iter()
            .zip(grad.rows())
            .zip(value.rows())
        {
            let dot = g.iter().zip(y).map(|(&g, &y)| g * y).sum::<f32>();
            for ((o, &g), &y) in o.iter_mut().zip(g).zip(y) {
                *o = (g - dot) * y;
            }
        }
        Ok(())
    }
}

/// Row-wise `z - logsumexp(z)`.
pub(crate) struct LogSoftmax;

impl Op for LogSoftmax {
    fn label(&self) -> &'static str {
        "log_softmax"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);

        for (mut o, row) in out.rows_mut().into_iter().zip(x.rows()) {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let lse = max
                + row
                    .iter()
                    .map(|&v| (v - max).exp())
                    .sum::<f32>()
                    .ln();
            for (o, &v) in o.iter_mut().zip(row) {
                *o = v - lse;
            }
        }
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        // dL/dz = g - softmax(z) * rowsum(g), with softmax(z) = exp(value).
        for ((mut o, g), y) in out
            .rows_mut()
            .into_iter()
            .zip(grad.rows())
            .zip(value.rows())
        {
            let total = g.sum();
            for ((o, &g), &y) in o.iter_mut().zip(g).zip(y) {
                *o = g - y.exp() * total;
            }
        }
        Ok(())
    }
}

/// Elementwise normal density of x under (m, s).
pub(crate) struct Gaussian;

impl Op for Gaussian {
    fn label(&self) -> &'static str {
        "gaussian"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let (x, m, s) = (inputs.value(0), inputs.value(1), inputs.value(2));
        check_same("gaussian", x, m)?;
        check_same("gaussian", x, s)?;
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);
        Zip::from(out).and(x).and(m).and(s).for_each(|o, &x, &m, &s| {
            let z = (x - m) / s;
            *o = (-0.5 * z * z).exp() / (s * SQRT_2PI);
        });
        Ok(())
    }

    fn pullback(
        &self,
        index: usize,
        grad: &Tensor,
        inputs: &Inputs,
        value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        let (x, m, s) = (inputs.value(0), inputs.value(1), inputs.value(2));
        let zip = Zip::from(out).and(grad).and(x).and(m).and(s).and(value);
        match index {
            0 => zip.for_each(|o, &g, &x, &m, &s, &y| *o = g * y * (m - x) / (s * s)),
            1 => zip.for_each(|o, &g, &x, &m, &s, &y| *o = g * y * (x - m) / (s * s)),
            _ => zip.for_each(|o, &g, &x, &m, &s, &y| {
                let d = x - m;
                *o = g * y * (d * d / (s * s * s) - 1.0 / s);
            }),
        }
        Ok(())
    }
}

/// Elementwise log of the normal density.
pub(crate) struct LogGaussian;

impl Op for LogGaussian {
    fn label(&self) -> &'static str {
        "log_gaussian"
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let (x, m, s) = (inputs.value(0), inputs.value(1), inputs.value(2));
        check_same("log_gaussian", x, m)?;
        check_same("log_gaussian", x, s)?;
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);
        Zip::from(out).and(x).and(m).and(s).for_each(|o, &x, &m, &s| {
            let z = (x - m) / s;
            *o = -0.5 * z * z - s.ln() - LN_SQRT_2PI;
        });
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
        let (x, m, s) = (inputs.value(0), inputs.value(1), inputs.value(2));
        let zip = Zip::from(out).and(grad).and(x).and(m).and(s);
        match index {
            0 => zip.for_each(|o, &g, &x, &m, &s| *o = g * (m - x) / (s * s)),
            1 => zip.for_each(|o, &g, &x, &m, &s| *o = g * (x - m) / (s * s)),
            _ => zip.for_each(|o, &g, &x, &m, &s| {
                let d = x - m;
                *o = g * (d * d / (s * s * s) - 1.0 / s);
            }),
        }
        Ok(())
    }
}

/// Reparameterized normal draw `m + s (.) eps` with `eps ~ N(0, 1)` redrawn
/// once per epoch.
pub(crate) struct Sampler {
    eps: Tensor,
}

impl Op for Sampler {
    fn label(&self) -> &'static str {
        "sampler"
    }

    fn forward(&mut self, inputs: &Inputs, rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let (m, s) = (inputs.value(0), inputs.value(1));
        check_same("sampler", m, s)?;
        let (rows, cols) = m.dim();
        tensor::resize(out, rows, cols);
        tensor::resize(&mut self.eps, rows, cols);
        self.eps.mapv_inplace(|_| rng.normal(0.0, 1.0));
        Zip::from(out)
            .and(m)
            .and(s)
            .and(&self.eps)
            .for_each(|o, &m, &s, &e| *o = m + s * e);
        Ok(())
    }

    fn pullback(
        &self,
        index: usize,
        grad: &Tensor,
        _inputs: &Inputs,
        _value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        if index == 0 {
            out.assign(grad);
        } else {
            Zip::from(out)
                .and(grad)
                .and(&self.eps)
                .for_each(|o, &g, &e| *o = g * e);
        }
        Ok(())
    }
}

impl Graph {
    pub fn softmax(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Softmax), vec![x])
    }

    pub fn log_softmax(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(LogSoftmax), vec![x])
    }

    pub fn gaussian(&mut self, x: NodeId, m: NodeId, s: NodeId) -> NodeId {
        self.push_op(Box::new(Gaussian), vec![x, m, s])
    }

    pub fn log_gaussian(&mut self, x: NodeId, m: NodeId, s: NodeId) -> NodeId {
        self.push_op(Box::new(LogGaussian), vec![x, m, s])
    }

    pub fn sampler(&mut self, m: NodeId, s: NodeId) -> NodeId {
        self.push_op(
            Box::new(Sampler {
                eps: tensor::empty(),
            }),
            vec![m, s],
        )
    }
}
