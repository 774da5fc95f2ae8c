//! Random source used by the sampling core (component A).
//!
//! Every probabilistic decision the sketch makes (candidate-set growth,
//! delete-slot selection) goes through this thin wrapper so that a whole
//! sketch can be reseeded for reproducible tests without threading an `&mut
//! dyn RngCore` through every private method.

use rand::{Rng, RngCore, SeedableRng};
use rand::rngs::StdRng;

/// Draws used internally by the core: a uniform double excluding zero, and
/// a uniform integer in `[0, bound)`.
pub struct RandomSource<R: RngCore = StdRng> {
    rng: R,
}

impl RandomSource<StdRng> {
    /// Seeds from the OS entropy source. Used by `Sketch::new`.
    pub fn from_os_rng() -> Self {
        RandomSource { rng: StdRng::from_os_rng() }
    }

    /// Deterministic construction for reproducible tests.
    pub fn from_seed(seed: u64) -> Self {
        RandomSource { rng: StdRng::seed_from_u64(seed) }
    }
}

impl<R: RngCore> RandomSource<R> {
    /// Wraps an already-constructed RNG (e.g. a test double).
    pub fn from_rng(rng: R) -> Self {
        RandomSource { rng }
    }

    /// A draw in the open-closed interval `(0, 1]`.
    ///
    /// `rand`'s standard `f64` sampling covers `[0, 1)`; this crate needs the
    /// complementary half-open interval so that every strict-less-than
    /// comparison against a threshold stays unambiguous (a draw of exactly
    /// `0.0` would make `u < x` always true regardless of `x`). Flipping to
    /// `1.0 - u` maps `[0, 1)` onto `(0, 1]` without introducing a new edge
    /// case at the top end: `1.0 - 0.0 = 1.0` is a legitimate, reachable
    /// value for this distribution.
    pub fn next_double_exclude_zero(&mut self) -> f64 {
        1.0 - self.rng.random::<f64>()
    }

    /// A uniform integer in `[0, bound)`. `bound` must be nonzero.
    pub fn next_usize(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0, "next_usize bound must be positive");
        self.rng.random_range(0..bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_zero_stays_in_range() {
        let mut src = RandomSource::from_seed(1);
        for _ in 0..10_000 {
            let u = src.next_double_exclude_zero();
            assert!(u > 0.0 && u <= 1.0, "u={u} out of (0, 1]");
        }
    }

    #[test]
    fn next_usize_stays_in_bound() {
        let mut src = RandomSource::from_seed(2);
        for _ in 0..10_000 {
            let n = src.next_usize(7);
            assert!(n < 7);
        }
    }

    #[test]
    fn same_seed_reproduces_same_sequence() {
        let mut a = RandomSource::from_seed(42);
        let mut b = RandomSource::from_seed(42);
        for _ in 0..100 {
            assert_eq!(a.next_double_exclude_zero(), b.next_double_exclude_zero());
        }
    }
}
