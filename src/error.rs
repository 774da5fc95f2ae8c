//! Error types for the sampling core and its binary serialization layer.

use thiserror::Error;

/// Everything that can go wrong constructing, updating, or (de)serializing
/// a [`crate::Sketch`].
#[derive(Debug, Error, PartialEq)]
pub enum SketchError {
    /// A constructor or range-checked accessor received an out-of-range
    /// argument, e.g. `k < 2`, or a slot index outside the live region.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `update` was called with a weight that is not strictly positive and
    /// finite.
    #[error("invalid weight {weight}: weights must be positive and finite")]
    InvalidWeight {
        /// The rejected weight, for diagnostics.
        weight: f64,
    },

    /// A binary image failed a §6.3 validation check: bad `pre_longs`, a
    /// truncated buffer, or an `r_count` of zero while `pre_longs = 3`.
    #[error("corrupt sketch image: {0}")]
    Corruption(String),

    /// The image's `ser_ver` byte does not match the version this crate
    /// understands.
    #[error("unsupported serialization version {found}, expected {expected}")]
    UnsupportedVersion {
        /// The version byte read from the image.
        found: u8,
        /// The version this crate implements.
        expected: u8,
    },
}
