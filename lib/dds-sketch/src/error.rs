//! Error types.

use snafu::Snafu;

/// Broad classification of a [`SketchError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The sketch configuration was invalid, or two sketches had incompatible configurations.
    Configuration,

    /// An observation could not be mapped to a bucket.
    Domain,

    /// A value could not be written to the wire format.
    Encoding,
}

/// A sketch error.
///
/// Every variant is fatal to the operation that produced it: no partially-built sketch or partially-written buffer is
/// ever handed back to the caller.
#[derive(Clone, Debug, PartialEq, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum SketchError {
    /// Gamma was not a finite value greater than one.
    #[snafu(display("gamma must be a finite value greater than 1, got {}", gamma))]
    InvalidGamma {
        /// The rejected gamma value.
        gamma: f64,
    },

    /// Two sketches with different versions were merged.
    #[snafu(display("cannot merge sketches with different versions: {} vs {}", left, right))]
    VersionMismatch {
        /// Version of the left-hand sketch.
        left: u8,

        /// Version of the right-hand sketch.
        right: u8,
    },

    /// Two sketches with different gamma values were merged.
    #[snafu(display("cannot merge sketches with different gamma values: {} vs {}", left, right))]
    GammaMismatch {
        /// Gamma of the left-hand sketch.
        left: f64,

        /// Gamma of the right-hand sketch.
        right: f64,
    },

    /// An observation was zero, negative, or not finite.
    #[snafu(display("observations must be positive and finite, got {}", value))]
    InvalidObservation {
        /// The rejected observation.
        value: f64,
    },

    /// An observation mapped to a bucket index that does not fit in an `i32`.
    #[snafu(display("observation {} maps to bucket index {} which is out of range", value, raw_index))]
    BucketIndexOutOfRange {
        /// The rejected observation.
        value: f64,

        /// The unrounded bucket index the observation mapped to.
        raw_index: f64,
    },

    /// A negative integer was passed to the varint encoder.
    #[snafu(display("refusing to encode varint for negative number {}", value))]
    NegativeVarint {
        /// The rejected integer.
        value: i64,
    },
}

impl SketchError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidGamma { .. } | Self::VersionMismatch { .. } | Self::GammaMismatch { .. } => {
                ErrorKind::Configuration
            }
            Self::InvalidObservation { .. } | Self::BucketIndexOutOfRange { .. } => ErrorKind::Domain,
            Self::NegativeVarint { .. } => ErrorKind::Encoding,
        }
    }
}
