//! Elementwise unary and binary operators.
//!
//! Scalar semantics live in the [`UnaryFn`]/[`BinaryFn`] enums; the two op
//! types apply them over whole tensors into reused buffers.

use ndarray::Zip;

use crate::graph::{Graph, Inputs, NodeId, Op, Result};
use crate::rng::Rng;
use crate::tensor::{self, Tensor};

use super::check_same;

const FRAC_2_SQRT_PI: f32 = 1.128_379_2;
const FRAC_1_SQRT_2PI: f32 = 0.398_942_28;
const FRAC_1_SQRT_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

#[derive(Clone, Copy, Debug)]
pub(crate) enum UnaryFn {
    Neg,
    Abs,
    Log,
    Exp,
    Tanh,
    Sigmoid,
    Relu,
    Erf,
    Gelu,
    Softplus,
}

impl UnaryFn {
    fn label(self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Log => "log",
            Self::Exp => "exp",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Relu => "relu",
            Self::Erf => "erf",
            Self::Gelu => "gelu",
            Self::Softplus => "softplus",
        }
    }

    fn f(self, x: f32) -> f32 {
        match self {
            Self::Neg => -x,
            Self::Abs => x.abs(),
            Self::Log => x.ln(),
            Self::Exp => x.exp(),
            Self::Tanh => x.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Relu => x.max(0.0),
            Self::Erf => tensor::erf(x),
            Self::Gelu => 0.5 * x * (1.0 + tensor::erf(x * FRAC_1_SQRT_2)),
            Self::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
        }
    }

    /// Derivative at `x`, with the forward output `y` available for the
    /// functions whose derivative is cheapest in terms of it.
    fn df(self, x: f32, y: f32) -> f32 {
        match self {
            Self::Neg => -1.0,
            Self::Abs => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Self::Log => 1.0 / x,
            Self::Exp => y,
            Self::Tanh => 1.0 - y * y,
            Self::Sigmoid => y * (1.0 - y),
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Erf => FRAC_2_SQRT_PI * (-x * x).exp(),
            Self::Gelu => {
                let cdf = 0.5 * (1.0 + tensor::erf(x * FRAC_1_SQRT_2));
                let pdf = FRAC_1_SQRT_2PI * (-0.5 * x * x).exp();
                cdf + x * pdf
            }
            Self::Softplus => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

pub(crate) struct Unary(pub(crate) UnaryFn);

impl Op for Unary {
    fn label(&self) -> &'static str {
        self.0.label()
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let x = inputs.value(0);
        let (rows, cols) = x.dim();
        tensor::resize(out, rows, cols);
        let f = self.0;
        Zip::from(out).and(x).for_each(|o, &x| *o = f.f(x));
        Ok(())
    }

    fn pullback(
        &self,
        _index: usize,
        grad: &Tensor,
        inputs: &Inputs,
        value: &Tensor,
        out: &mut Tensor,
    ) -> Result<()> {
        let f = self.0;
        Zip::from(out)
            .and(grad)
            .and(inputs.value(0))
            .and(value)
            .for_each(|o, &g, &x, &y| *o = g * f.df(x, y));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum BinaryFn {
    Add,
    Sub,
    Mul,
    Div,
    Power,
    Min,
    Max,
}

impl BinaryFn {
    fn label(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Power => "power",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    fn f(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Power => a.powf(b),
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }

    /// Partial derivative with respect to the left operand. Ties in min/max
    /// route the gradient to the left operand.
    fn dfda(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add | Self::Sub => 1.0,
            Self::Mul => b,
            Self::Div => 1.0 / b,
            Self::Power => b * a.powf(b - 1.0),
            Self::Min => {
                if a <= b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Max => {
                if a >= b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn dfdb(self, a: f32, b: f32, y: f32) -> f32 {
        match self {
            Self::Add => 1.0,
            Self::Sub => -1.0,
            Self::Mul => a,
            Self::Div => -a / (b * b),
            Self::Power => y * a.ln(),
            Self::Min => {
                if a <= b {
                    0.0
                } else {
                    1.0
                }
            }
            Self::Max => {
                if a >= b {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }
}

pub(crate) struct Binary(pub(crate) BinaryFn);

impl Op for Binary {
    fn label(&self) -> &'static str {
        self.0.label()
    }

    fn forward(&mut self, inputs: &Inputs, _rng: &mut Rng, out: &mut Tensor) -> Result<()> {
        let (a, b) = (inputs.value(0), inputs.value(1));
        check_same(self.0.label(), a, b)?;
        let (rows, cols) = a.dim();
        tensor::resize(out, rows, cols);
        let f = self.0;
        Zip::from(out)
            .and(a)
            .and(b)
            .for_each(|o, &a, &b| *o = f.f(a, b));
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
        let f = self.0;
        let zip = Zip::from(out)
            .and(grad)
            .and(inputs.value(0))
            .and(inputs.value(1))
            .and(value);
        if index == 0 {
            zip.for_each(|o, &g, &a, &b, &_| *o = g * f.dfda(a, b));
        } else {
            zip.for_each(|o, &g, &a, &b, &y| *o = g * f.dfdb(a, b, y));
        }
        Ok(())
    }
}

impl Graph {
    pub fn neg(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Neg)), vec![x])
    }

    pub fn abs(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Abs)), vec![x])
    }

    pub fn log(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Log)), vec![x])
    }

    pub fn exp(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Exp)), vec![x])
    }

    pub fn tanh(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Tanh)), vec![x])
    }

    pub fn sigmoid(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Sigmoid)), vec![x])
    }

    pub fn relu(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Relu)), vec![x])
    }

    pub fn erf(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Erf)), vec![x])
    }

    pub fn gelu(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Gelu)), vec![x])
    }

    pub fn softplus(&mut self, x: NodeId) -> NodeId {
        self.push_op(Box::new(Unary(UnaryFn::Softplus)), vec![x])
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Add)), vec![a, b])
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Sub)), vec![a, b])
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Mul)), vec![a, b])
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Div)), vec![a, b])
    }

    pub fn power(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Power)), vec![a, b])
    }

    pub fn min(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Min)), vec![a, b])
    }

    pub fn max(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_op(Box::new(Binary(BinaryFn::Max)), vec![a, b])
    }
}
