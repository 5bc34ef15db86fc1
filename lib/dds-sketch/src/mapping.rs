//! Logarithmic index mapping.

use snafu::ensure;

use crate::error::{BucketIndexOutOfRange, InvalidGamma, InvalidObservation, SketchError};

const I32_MIN_AS_F64: f64 = i32::MIN as f64;
const I32_MAX_AS_F64: f64 = i32::MAX as f64;

/// Maps positive values to integer bucket indices.
///
/// Values are mapped using `index = ceil(ln(value) / ln(gamma))`, so bucket `k` covers the half-open range
/// `(gamma^(k-1), gamma^k]`. Rounding always goes up: every value lands in the bucket whose upper bound is at least the
/// value itself, which bounds the relative error of the bucket's representative value by `(gamma - 1) / (gamma + 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogarithmicMapping {
    /// The base of the logarithm, which determines bucket widths.
    gamma: f64,

    /// Precomputed `ln(gamma)`.
    gamma_ln: f64,
}

impl LogarithmicMapping {
    /// Creates a new `LogarithmicMapping` with the given gamma.
    ///
    /// # Errors
    ///
    /// If `gamma` is not a finite value greater than one, an error is returned.
    pub fn new(gamma: f64) -> Result<Self, SketchError> {
        // Written so that NaN fails the check as well.
        ensure!(gamma.is_finite() && gamma > 1.0, InvalidGamma { gamma });

        Ok(Self {
            gamma,
            gamma_ln: gamma.ln(),
        })
    }

    /// Returns the gamma value for this mapping.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Returns the relative accuracy guaranteed by this mapping.
    pub fn relative_accuracy(&self) -> f64 {
        (self.gamma - 1.0) / (self.gamma + 1.0)
    }

    /// Returns the bucket index for the given value.
    ///
    /// # Errors
    ///
    /// If `value` is not a positive, finite number, or if it maps to an index that does not fit in an `i32`, an error
    /// is returned.
    pub fn index(&self, value: f64) -> Result<i32, SketchError> {
        ensure!(value.is_finite() && value > 0.0, InvalidObservation { value });

        // Divide rather than multiply by a cached reciprocal: the two can round differently, and values sitting right
        // on a bucket boundary would then land in a different bucket than other encoders put them in.
        let raw_index = (value.ln() / self.gamma_ln).ceil();
        ensure!(
            (I32_MIN_AS_F64..=I32_MAX_AS_F64).contains(&raw_index),
            BucketIndexOutOfRange { value, raw_index }
        );

        Ok(raw_index as i32)
    }

    /// Returns the lower bound (exclusive) of the bucket at the given index.
    pub fn lower_bound(&self, index: i32) -> f64 {
        self.gamma.powf(f64::from(index) - 1.0)
    }

    /// Returns the upper bound (inclusive) of the bucket at the given index.
    pub fn upper_bound(&self, index: i32) -> f64 {
        self.gamma.powf(f64::from(index))
    }
}
