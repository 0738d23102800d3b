//! Numeric helpers used around training loops: discounted rewards, cosine
//! similarity and moving averages.

use crate::tensor::{self, Tensor};

/// Backwards-accumulated discounted reward:
/// `out[i] = r[i] + gamma * out[i + 1]`.
pub fn discount_reward(rewards: &[f32], gamma: f32) -> Vec<f32> {
    let mut out = rewards.to_vec();
    let mut acc = 0.0;
    for v in out.iter_mut().rev() {
        acc = *v + gamma * acc;
        *v = acc;
    }
    out
}

/// Cosine similarity of a `1 x n` query against each column of an
/// `n x m` matrix, producing `1 x m`. Zero vectors yield zero similarity.
pub fn cosine_similarity(query: &Tensor, columns: &Tensor) -> Tensor {
    let n = query.len();
    let m = columns.ncols();
    let mut out = tensor::zeros(1, m);

    let qnorm = query.iter().map(|&v| v * v).sum::<f32>().sqrt();
    for c in 0..m {
        let col = columns.column(c);
        let dot: f32 = query.iter().zip(col.iter()).map(|(&a, &b)| a * b).sum();
        let cnorm = col.iter().map(|&v| v * v).sum::<f32>().sqrt();
        let denom = qnorm * cnorm;
        out[[0, c]] = if denom == 0.0 { 0.0 } else { dot / denom };
    }
    debug_assert_eq!(n, columns.nrows());
    out
}

/// Simple moving average over a fixed window.
pub struct Sma {
    window: usize,
    history: Vec<Tensor>,
    next: usize,
    value: Tensor,
}

impl Sma {
    pub fn new(initial: f32, window: usize) -> Self {
        Self {
            window,
            history: Vec::new(),
            next: 0,
            value: tensor::full(1, 1, initial),
        }
    }

    pub fn update(&mut self, x: &Tensor) {
        if self.history.len() < self.window {
            self.history.push(x.clone());
        } else {
            self.history[self.next].assign(x);
            self.next = (self.next + 1) % self.window;
        }

        let (rows, cols) = x.dim();
        tensor::resize(&mut self.value, rows, cols);
        self.value.fill(0.0);
        for t in &self.history {
            self.value += t;
        }
        self.value /= self.history.len() as f32;
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }
}

/// Exponential moving average with decay `alpha`.
pub struct Ema {
    alpha: f32,
    value: Tensor,
    primed: bool,
}

impl Ema {
    pub fn new(initial: f32, alpha: f32) -> Self {
        Self {
            alpha,
            value: tensor::full(1, 1, initial),
            primed: false,
        }
    }

    pub fn update(&mut self, x: &Tensor) {
        if !self.primed {
            self.value = x.clone();
            self.primed = true;
            return;
        }
        let alpha = self.alpha;
        ndarray::Zip::from(&mut self.value)
            .and(x)
            .for_each(|v, &x| *v = alpha * *v + (1.0 - alpha) * x);
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }
}

/// Weight-normalized moving average: samples carry explicit weights.
pub struct Wma {
    window: usize,
    history: Vec<(Tensor, f32)>,
    next: usize,
    value: Tensor,
}

impl Wma {
    pub fn new(initial: f32, window: usize) -> Self {
        Self {
            window,
            history: Vec::new(),
            next: 0,
            value: tensor::full(1, 1, initial),
        }
    }

    pub fn update(&mut self, x: &Tensor, weight: f32) {
        if self.history.len() < self.window {
            self.history.push((x.clone(), weight));
        } else {
            self.history[self.next].0.assign(x);
            self.history[self.next].1 = weight;
            self.next = (self.next + 1) % self.window;
        }

        let (rows, cols) = x.dim();
        tensor::resize(&mut self.value, rows, cols);
        self.value.fill(0.0);
        let mut total = 0.0;
        for (t, w) in &self.history {
            self.value.scaled_add(*w, t);
            total += w;
        }
        if total != 0.0 {
            self.value /= total;
        }
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }
}
