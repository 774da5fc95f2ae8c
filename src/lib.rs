//! A variance-optimal (VarOpt) weighted reservoir sample.
//!
//! [`Sketch<T>`] maintains a bounded-size sample over a one-pass stream
//! of `(item, weight)` pairs such that, at any point, every prefix seen
//! so far is summarized by a sample whose per-item inclusion probability
//! is proportional to weight and whose variance on any linear statistic
//! of the stream is no worse than an unweighted reservoir sample's. Items
//! heavier than the current sampling threshold are kept exactly; lighter
//! items compete for the remaining slots through weighted random
//! eviction. See Cohen, Duffield, Lund & Thorup, "Variance Optimal
//! Sampling Based Estimation of Subset Sums" for the algorithm this
//! implements.
//!
//! ```
//! use varopt_sketch::Sketch;
//!
//! let mut sketch: Sketch<&str> = Sketch::with_seed(3, 7).unwrap();
//! for (item, weight) in [("a", 1.0), ("b", 5.0), ("c", 2.0), ("d", 9.0)] {
//!     sketch.update(item, weight).unwrap();
//! }
//! let (items, weights) = sketch.samples();
//! assert_eq!(items.len(), weights.len());
//! ```

mod buffer;
mod error;
mod format;
mod rng;
mod serde;
mod sketch;

pub use error::SketchError;
pub use format::{from_bytes, to_bytes};
pub use rng::RandomSource;
pub use serde::{ByteCursor, F64SerDe, I64SerDe, SerDe};
pub use sketch::Sketch;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_example_shape_holds() {
        let mut sketch: Sketch<&str> = Sketch::with_seed(3, 1).unwrap();
        for (item, weight) in [("a", 1.0), ("b", 5.0), ("c", 2.0), ("d", 9.0)] {
            sketch.update(item, weight).unwrap();
        }
        assert_eq!(sketch.num_samples(), 3);
    }
}
