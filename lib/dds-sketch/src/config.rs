//! Sketch configuration.

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt as _, Snafu};
use tracing::debug;

use crate::{
    error::{GammaMismatch, SketchError, VersionMismatch},
    mapping::LogarithmicMapping,
};

/// Default sketch version.
pub const DEFAULT_VERSION: u8 = 1;

/// Default relative accuracy, 1%.
pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;

/// Default gamma, derived from [`DEFAULT_RELATIVE_ACCURACY`].
///
/// This works out to roughly `1.0202`.
pub const DEFAULT_GAMMA: f64 = (1.0 + DEFAULT_RELATIVE_ACCURACY) / (1.0 - DEFAULT_RELATIVE_ACCURACY);

/// A configuration loading error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationLoadError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// The configuration could not be extracted from its sources.
    #[snafu(display("Failed to extract sketch configuration: {}", source))]
    Extract {
        /// Error source.
        source: Box<figment::Error>,
    },

    /// The configuration was extracted, but is not a valid sketch configuration.
    #[snafu(display("Invalid sketch configuration: {}", source))]
    Invalid {
        /// Error source.
        source: SketchError,
    },
}

/// Sketch configuration.
///
/// Two sketches can only be merged if their configurations are identical: the same version, and the exact same gamma.
///
/// Both fields have defaults, so the configuration can be deserialized from a partial (or empty) document.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SketchConfiguration {
    /// Version of the encoding.
    ///
    /// Written as the first byte of every encoded sketch.
    version: u8,

    /// Bucket growth ratio.
    ///
    /// Must be greater than one. The relative error of the sketch is `(gamma - 1) / (gamma + 1)`.
    gamma: f64,
}

impl SketchConfiguration {
    /// Creates a configuration with the given version and gamma.
    ///
    /// # Errors
    ///
    /// If `gamma` is not a finite value greater than one, an error is returned.
    pub fn new(version: u8, gamma: f64) -> Result<Self, SketchError> {
        let config = Self { version, gamma };
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration from a version and a gamma that is already known to be valid.
    pub(crate) fn from_mapping(version: u8, mapping: &LogarithmicMapping) -> Self {
        Self {
            version,
            gamma: mapping.gamma(),
        }
    }

    /// Creates a configuration with the default version whose gamma provides the given relative accuracy.
    ///
    /// Gamma is derived as `(1 + relative_accuracy) / (1 - relative_accuracy)`.
    ///
    /// # Errors
    ///
    /// If the relative accuracy is not between `0` and `1` (exclusive), the derived gamma is invalid and an error is
    /// returned.
    pub fn with_relative_accuracy(relative_accuracy: f64) -> Result<Self, SketchError> {
        Self::new(DEFAULT_VERSION, (1.0 + relative_accuracy) / (1.0 - relative_accuracy))
    }

    /// Sets the version.
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Returns the version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns gamma.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Returns the relative accuracy provided by this configuration.
    pub fn relative_accuracy(&self) -> f64 {
        (self.gamma - 1.0) / (self.gamma + 1.0)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If gamma is not a finite value greater than one, an error is returned.
    pub fn validate(&self) -> Result<(), SketchError> {
        self.mapping().map(|_| ())
    }

    /// Builds the index mapping described by this configuration.
    ///
    /// # Errors
    ///
    /// If gamma is not a finite value greater than one, an error is returned.
    pub fn mapping(&self) -> Result<LogarithmicMapping, SketchError> {
        LogarithmicMapping::new(self.gamma)
    }

    /// Returns `Ok(())` if sketches built with `other` can be merged with sketches built with this configuration.
    ///
    /// # Errors
    ///
    /// If the versions differ, or the gamma values are not exactly equal, an error is returned.
    pub fn check_compatible(&self, other: &Self) -> Result<(), SketchError> {
        if self.version != other.version {
            debug!(
                left = self.version,
                right = other.version,
                "Refusing to merge sketches with different versions."
            );
            return VersionMismatch {
                left: self.version,
                right: other.version,
            }
            .fail();
        }

        // Exact comparison: gammas that differ in the last bit still produce different bucket boundaries.
        if self.gamma != other.gamma {
            debug!(
                left = self.gamma,
                right = other.gamma,
                "Refusing to merge sketches with different gamma values."
            );
            return GammaMismatch {
                left: self.gamma,
                right: other.gamma,
            }
            .fail();
        }

        Ok(())
    }

    /// Extracts a configuration from the given `Figment`.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// If the data cannot be deserialized into a configuration, or the resulting configuration is invalid, an error is
    /// returned.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigurationLoadError> {
        let config: Self = figment.extract().map_err(Box::new).context(Extract)?;
        config.validate().context(Invalid)?;

        debug!(
            version = config.version,
            gamma = config.gamma,
            "Loaded sketch configuration."
        );

        Ok(config)
    }

    /// Loads a configuration from environment variables with the given prefix.
    ///
    /// The prefix is joined to the field name with an underscore, so a prefix of `DDS` reads `DDS_VERSION` and
    /// `DDS_GAMMA`. Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, if a variable cannot be parsed, or if the resulting configuration is invalid, an error
    /// is returned.
    pub fn from_environment(prefix: &str) -> Result<Self, ConfigurationLoadError> {
        ensure!(!prefix.is_empty(), EmptyPrefix);

        let prefix = if prefix.ends_with('_') {
            prefix.to_string()
        } else {
            format!("{}_", prefix)
        };

        let figment = Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(&prefix));
        Self::from_figment(&figment)
    }
}

impl Default for SketchConfiguration {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            gamma: DEFAULT_GAMMA,
        }
    }
}
