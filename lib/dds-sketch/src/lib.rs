//! A mergeable, relative-error quantile sketch with a compact binary encoding.
//!
//! Observations are counted in logarithmically-sized buckets, so that any value can be recovered from its bucket to
//! within a fixed relative error. Sketches built with the same configuration can be merged without access to the
//! original observations, which makes them suitable for building one sketch per shard and combining them centrally.
//!
//! # Example
//!
//! ```
//! use dds_sketch::{Sketch, SketchConfiguration};
//!
//! let config = SketchConfiguration::default();
//! let shard_a = Sketch::new(&config, [12.5, 40.0, 41.0]).unwrap();
//! let shard_b = Sketch::new(&config, [39.5, 1200.0]).unwrap();
//!
//! let combined = shard_a.merge(&shard_b).unwrap();
//! assert_eq!(combined.count(), 5);
//!
//! let encoded = combined.hex().unwrap();
//! assert!(encoded.starts_with("01"));
//! ```
#![deny(warnings)]
#![deny(missing_docs)]

mod accumulator;
pub use self::accumulator::SketchAccumulator;

mod config;
pub use self::config::{
    ConfigurationLoadError, SketchConfiguration, DEFAULT_GAMMA, DEFAULT_RELATIVE_ACCURACY, DEFAULT_VERSION,
};

mod error;
pub use self::error::{ErrorKind, SketchError};

mod mapping;
pub use self::mapping::LogarithmicMapping;

mod sketch;
pub use self::sketch::{Sketch, HEADER_LEN};

pub mod varint;

/// Compares two floating-point values for approximate equality using a ratio-based approach.
#[cfg(test)]
pub(crate) fn float_eq(l_value: f64, r_value: f64) -> bool {
    use float_cmp::ApproxEqRatio as _;

    const RATIO_ERROR: f64 = 0.00000001;

    l_value.approx_eq_ratio(&r_value, RATIO_ERROR)
}
