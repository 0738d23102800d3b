//! Dense matrix adapter: a thin layer over `ndarray`.
//!
//! Every tensor in the graph is a 2-D row-major `f32` array. The row-major
//! layout is part of the data contract: convolution flattening, embedding
//! lookups and the storage codec all rely on it.

use ndarray::Array2;

use crate::rng::Rng;

pub type Tensor = Array2<f32>;

/// A 0x0 placeholder used for values that have not been computed or sized.
pub fn empty() -> Tensor {
    Tensor::zeros((0, 0))
}

pub fn zeros(rows: usize, cols: usize) -> Tensor {
    Tensor::zeros((rows, cols))
}

pub fn ones(rows: usize, cols: usize) -> Tensor {
    Tensor::ones((rows, cols))
}

pub fn full(rows: usize, cols: usize, value: f32) -> Tensor {
    Tensor::from_elem((rows, cols), value)
}

pub fn eye(n: usize) -> Tensor {
    Tensor::eye(n)
}

/// Uniform fill over [-1, 1], the conventional random matrix fill.
pub fn randu(rows: usize, cols: usize, rng: &mut Rng) -> Tensor {
    Tensor::from_shape_simple_fn((rows, cols), || rng.uniform(-1.0, 1.0))
}

/// Standard normal fill.
pub fn randn(rows: usize, cols: usize, rng: &mut Rng) -> Tensor {
    Tensor::from_shape_simple_fn((rows, cols), || rng.normal(0.0, 1.0))
}

/// Reuses the buffer when the shape already matches, reallocates otherwise.
///
/// After the first forward pass sizes every buffer, steady-state training
/// never reallocates through this path.
pub fn resize(out: &mut Tensor, rows: usize, cols: usize) {
    if out.dim() != (rows, cols) {
        *out = Tensor::zeros((rows, cols));
    }
}

/// Frobenius-norm relative comparison.
pub fn is_approx(a: &Tensor, b: &Tensor, tol: f32) -> bool {
    if a.dim() != b.dim() {
        return false;
    }
    let diff = (a - b).mapv(|v| v * v).sum().sqrt();
    let na = a.mapv(|v| v * v).sum().sqrt();
    let nb = b.mapv(|v| v * v).sum().sqrt();
    diff <= tol * na.min(nb)
}

/// Error function, Abramowitz & Stegun 7.1.26 (|error| < 1.5e-7).
pub fn erf(x: f32) -> f32 {
    const A1: f32 = 0.254829592;
    const A2: f32 = -0.284496736;
    const A3: f32 = 1.421413741;
    const A4: f32 = -1.453152027;
    const A5: f32 = 1.061405429;
    const P: f32 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_keeps_buffer_when_shape_matches() {
        let mut t = zeros(3, 4);
        let ptr = t.as_ptr();
        resize(&mut t, 3, 4);
        assert_eq!(t.as_ptr(), ptr);

        resize(&mut t, 2, 6);
        assert_eq!(t.dim(), (2, 6));
    }

    #[test]
    fn test_erf_reference_values() {
        assert!((erf(1.0) - 0.842_700_8).abs() < 1e-6);
        assert!((erf(-3.0) + 0.999_977_9).abs() < 1e-6);
        assert!(erf(0.0) == 0.0);
        assert!((erf(4.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_approx() {
        let a = full(2, 2, 1.0);
        let mut b = a.clone();
        b[[0, 0]] = 1.0 + 1e-5;
        assert!(is_approx(&a, &b, 1e-3));
        assert!(!is_approx(&a, &b, 1e-7));
        assert!(!is_approx(&a, &zeros(2, 3), 1e-3));
    }

    #[test]
    fn test_random_fills_use_seeded_rng() {
        let mut rng = Rng::seeded(7);
        let a = randu(4, 4, &mut rng);
        let mut rng = Rng::seeded(7);
        let b = randu(4, 4, &mut rng);
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| (-1.0..=1.0).contains(&v)));
    }
}
