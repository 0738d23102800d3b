//! Random number generation for graphs.
//!
//! Each [`crate::Graph`] owns one generator; nothing here is shared across
//! threads. Seeded construction makes dropout masks and samplers
//! reproducible in tests.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

pub struct Rng(StdRng);

impl Rng {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    pub fn uniform(&mut self, lo: f32, hi: f32) -> f32 {
        Uniform::new_inclusive(lo, hi).sample(&mut self.0)
    }

    pub fn normal(&mut self, mean: f32, std_dev: f32) -> f32 {
        if std_dev == 0.0 {
            return mean;
        }
        // Parameters are finite by construction.
        match Normal::new(mean, std_dev) {
            Ok(dist) => dist.sample(&mut self.0),
            Err(_) => mean,
        }
    }

    /// Samples an index from an unnormalized discrete distribution.
    pub fn discrete_choice(&mut self, weights: &[f32]) -> usize {
        let total: f32 = weights.iter().sum();
        if total <= 0.0 {
            return 0;
        }
        let mut point = self.uniform(0.0, total);
        for (i, &w) in weights.iter().enumerate() {
            point -= w;
            if point <= 0.0 {
                return i;
            }
        }
        weights.len() - 1
    }

    /// Partial Fisher-Yates: shuffles `m` random picks into the front of
    /// `items`.
    pub fn shuffle<T>(&mut self, items: &mut [T], m: usize) {
        let n = items.len();
        for i in 0..m.min(n.saturating_sub(1)) {
            let j = self.0.gen_range(i..n);
            items.swap(i, j);
        }
    }
}

impl Default for Rng {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discrete_choice_follows_weights() {
        let mut rng = Rng::seeded(3);
        let weights = [0.1, 0.2, 0.4, 0.5];

        let mut hist = [0usize; 4];
        for _ in 0..1000 {
            hist[rng.discrete_choice(&weights)] += 1;
        }

        let mut prev = 0;
        for count in hist {
            assert!(prev < count);
            prev = count;
        }
    }

    #[test]
    fn test_shuffle_m_of_n_changes_order() {
        let mut rng = Rng::seeded(11);
        let original: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut items = original.clone();
        rng.shuffle(&mut items, 3);
        assert_ne!(original, items);

        let mut sorted = items.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(original, sorted);
    }

    #[test]
    fn test_normal_with_zero_std_is_mean() {
        let mut rng = Rng::seeded(1);
        assert_eq!(rng.normal(4.5, 0.0), 4.5);
    }
}
