//! Mergeable relative-error sketch.

use std::{collections::BTreeMap, fmt};

use tracing::trace;

use crate::{
    config::SketchConfiguration,
    error::SketchError,
    mapping::LogarithmicMapping,
    varint::{encode_varint, encode_varint_u64, encoded_len_varint},
};

/// Length of the fixed-size header: version (1 byte), gamma (8 bytes), and sum (8 bytes).
pub const HEADER_LEN: usize = 1 + 8 + 8;

/// A mergeable, relative-error quantile sketch over positive observations.
///
/// Each observation `v` is counted in the bucket `ceil(ln(v) / ln(gamma))`, alongside a running count and sum of all
/// observations. Two sketches with the same configuration can be merged into the sketch of the union of their
/// observations, without access to the original data, which allows building one sketch per shard and combining them
/// centrally in any order.
///
/// Sketches are values: they are built once, and merging produces a new sketch rather than modifying either operand.
/// See [`SketchAccumulator`][crate::SketchAccumulator] for folding many sketches together without intermediate copies.
///
/// # Encoding
///
/// [`raw`][Self::raw] produces the following layout:
///
/// | field   | encoding                                  |
/// |---------|-------------------------------------------|
/// | version | 1 byte                                    |
/// | gamma   | IEEE-754 double, little-endian (8 bytes)  |
/// | sum     | IEEE-754 double, little-endian (8 bytes)  |
/// | count   | varint                                    |
/// | buckets | repeated `varint(key delta)`, `varint(count)` |
///
/// Buckets are written in ascending key order, and each key is written as the difference from the previous key, with
/// an implicit previous key of zero before the first bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Sketch {
    /// Version of the encoding.
    version: u8,

    /// Index mapping, which also carries gamma.
    mapping: LogarithmicMapping,

    /// Sum of all observations.
    sum: f64,

    /// Number of observations.
    count: u64,

    /// Observation counts, keyed by bucket index.
    buckets: BTreeMap<i32, u64>,
}

impl Sketch {
    /// Creates an empty sketch with the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn empty(config: &SketchConfiguration) -> Result<Self, SketchError> {
        Ok(Self {
            version: config.version(),
            mapping: config.mapping()?,
            sum: 0.0,
            count: 0,
            buckets: BTreeMap::new(),
        })
    }

    /// Creates a sketch with the given configuration over the given observations.
    ///
    /// The sum is accumulated in iteration order.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or if any observation is not a positive, finite number, an error is returned.
    pub fn new<I>(config: &SketchConfiguration, values: I) -> Result<Self, SketchError>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut sketch = Self::empty(config)?;
        for value in values {
            sketch.insert(value)?;
        }

        Ok(sketch)
    }

    /// Creates a sketch with the default configuration over the given observations.
    ///
    /// # Errors
    ///
    /// If any observation is not a positive, finite number, an error is returned.
    pub fn from_values<I>(values: I) -> Result<Self, SketchError>
    where
        I: IntoIterator<Item = f64>,
    {
        Self::new(&SketchConfiguration::default(), values)
    }

    fn insert(&mut self, value: f64) -> Result<(), SketchError> {
        let index = self.mapping.index(value)?;
        *self.buckets.entry(index).or_insert(0) += 1;
        self.sum += value;
        self.count += 1;
        Ok(())
    }

    /// Creates a sketch directly from its parts.
    ///
    /// `count` is derived from the bucket counts.
    pub(crate) fn from_parts(version: u8, mapping: LogarithmicMapping, sum: f64, buckets: BTreeMap<i32, u64>) -> Self {
        let count = buckets.values().fold(0u64, |acc, &n| acc.saturating_add(n));
        Self {
            version,
            mapping,
            sum,
            count,
            buckets,
        }
    }

    /// Returns the version.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns gamma.
    pub fn gamma(&self) -> f64 {
        self.mapping.gamma()
    }

    /// Returns the configuration of this sketch.
    pub fn config(&self) -> SketchConfiguration {
        SketchConfiguration::from_mapping(self.version, &self.mapping)
    }

    /// Returns the index mapping.
    pub fn mapping(&self) -> &LogarithmicMapping {
        &self.mapping
    }

    /// Returns the relative accuracy of this sketch.
    pub fn relative_accuracy(&self) -> f64 {
        self.mapping.relative_accuracy()
    }

    /// Returns the sum of all observations.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Returns the number of observations.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns `true` if the sketch has no observations.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the mean of all observations.
    ///
    /// Returns `None` if the sketch is empty.
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Returns the number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the number of observations in the bucket at the given index.
    pub fn bucket(&self, index: i32) -> u64 {
        self.buckets.get(&index).copied().unwrap_or(0)
    }

    /// Returns an iterator over the non-empty buckets, as `(index, count)` pairs in ascending index order.
    pub fn buckets(&self) -> impl ExactSizeIterator<Item = (i32, u64)> + '_ {
        self.buckets.iter().map(|(&index, &count)| (index, count))
    }

    /// Returns `Ok(())` if `other` can be merged with this sketch.
    ///
    /// # Errors
    ///
    /// If the versions differ, or the gamma values are not exactly equal, an error is returned.
    pub fn check_compatible(&self, other: &Self) -> Result<(), SketchError> {
        self.config().check_compatible(&other.config())
    }

    /// Merges this sketch with `other`, returning the sketch of the union of their observations.
    ///
    /// Neither operand is modified. Bucket counts and observation counts add exactly, so merging is commutative and
    /// associative over them; the sum is a single floating-point addition of the two operand sums.
    ///
    /// # Errors
    ///
    /// If the sketches have different versions or different gamma values, an error is returned.
    pub fn merge(&self, other: &Self) -> Result<Self, SketchError> {
        self.check_compatible(other)?;

        let mut buckets = self.buckets.clone();
        for (&index, &count) in &other.buckets {
            let existing = buckets.entry(index).or_insert(0);
            *existing = existing.saturating_add(count);
        }

        Ok(Self {
            version: self.version,
            mapping: self.mapping,
            sum: self.sum + other.sum,
            count: self.count.saturating_add(other.count),
            buckets,
        })
    }

    /// Returns the exact length, in bytes, of the encoded sketch.
    ///
    /// This is only meaningful for sketches that can be encoded: see [`encode_into`][Self::encode_into].
    pub fn encoded_len(&self) -> usize {
        let mut prev_key = 0i64;
        let buckets_len = self
            .buckets
            .iter()
            .map(|(&key, &count)| {
                let delta = i64::from(key) - prev_key;
                prev_key = i64::from(key);
                encoded_len_varint(delta.unsigned_abs()) + encoded_len_varint(count)
            })
            .sum::<usize>();

        HEADER_LEN + encoded_len_varint(self.count) + buckets_len
    }

    /// Appends the encoded sketch to `dst`.
    ///
    /// # Errors
    ///
    /// If the lowest bucket index is negative, which happens when any observation is less than one, the first bucket
    /// delta cannot be encoded and an error is returned. Nothing is appended to `dst` in that case.
    pub fn encode_into(&self, dst: &mut Vec<u8>) -> Result<(), SketchError> {
        let start = dst.len();
        dst.reserve(self.encoded_len());

        if let Err(e) = self.write_encoded(dst) {
            dst.truncate(start);
            return Err(e);
        }

        trace!(
            buckets = self.buckets.len(),
            encoded_len = dst.len() - start,
            "Encoded sketch."
        );

        Ok(())
    }

    fn write_encoded(&self, dst: &mut Vec<u8>) -> Result<(), SketchError> {
        dst.push(self.version);
        dst.extend_from_slice(&self.gamma().to_le_bytes());
        dst.extend_from_slice(&self.sum.to_le_bytes());
        encode_varint_u64(self.count, dst);

        let mut prev_key = 0i64;
        for (&key, &count) in &self.buckets {
            let key = i64::from(key);
            encode_varint(key - prev_key, dst)?;
            encode_varint_u64(count, dst);
            prev_key = key;
        }

        Ok(())
    }

    /// Returns the encoded sketch.
    ///
    /// # Errors
    ///
    /// See [`encode_into`][Self::encode_into].
    pub fn raw(&self) -> Result<Vec<u8>, SketchError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Returns the encoded sketch as a lowercase hexadecimal string.
    ///
    /// # Errors
    ///
    /// See [`encode_into`][Self::encode_into].
    pub fn hex(&self) -> Result<String, SketchError> {
        self.raw().map(hex::encode)
    }
}

impl fmt::Display for Sketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sketch<version: {}, sum: {}, count: {}, gamma: {}, bucket_count: {}, buckets: {{",
            self.version,
            self.sum,
            self.count,
            self.gamma(),
            self.buckets.len()
        )?;
        for (i, (index, count)) in self.buckets.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", index, count)?;
        }
        write!(f, "}}>")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Sketch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;

        let mut state = serializer.serialize_struct("Sketch", 5)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("sum", &self.sum)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("gamma", &self.gamma())?;
        state.serialize_field("buckets", &self.buckets)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::*;
    use crate::config::DEFAULT_GAMMA;
    use crate::error::ErrorKind;

    fn sketch(values: &[f64]) -> Sketch {
        Sketch::from_values(values.iter().copied()).unwrap()
    }

    #[test]
    fn empty() {
        let sketch = Sketch::empty(&SketchConfiguration::default()).unwrap();
        assert!(sketch.is_empty());
        assert_eq!(sketch.count(), 0);
        assert_eq!(sketch.sum(), 0.0);
        assert_eq!(sketch.bucket_count(), 0);
        assert_eq!(sketch.mean(), None);
        assert_eq!(sketch, Sketch::from_values(std::iter::empty()).unwrap());
    }

    #[test]
    fn single_value() {
        let sketch = sketch(&[1.0]);
        assert_eq!(sketch.version(), 1);
        assert_eq!(sketch.gamma(), DEFAULT_GAMMA);
        assert_eq!(sketch.sum(), 1.0);
        assert_eq!(sketch.count(), 1);
        assert_eq!(sketch.buckets().collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn two_values() {
        let sketch = sketch(&[10.0, 100.0]);
        assert_eq!(sketch.count(), 2);
        assert_eq!(sketch.sum(), 110.0);
        assert_eq!(sketch.mean(), Some(55.0));
        assert_eq!(sketch.buckets().collect::<Vec<_>>(), vec![(116, 1), (231, 1)]);
    }

    #[test]
    fn repeated_values_share_a_bucket() {
        let sketch = sketch(&[3.0, 3.0, 3.0, 2.0]);
        assert_eq!(sketch.bucket_count(), 2);
        assert_eq!(sketch.bucket(55), 3);
        assert_eq!(sketch.bucket(35), 1);
        assert_eq!(sketch.bucket(36), 0);
    }

    #[test]
    fn sum_is_accumulated_in_order() {
        let values = [0.1, 0.2, 0.3, 1e16, 1.0];
        let expected = values.iter().fold(0.0, |acc, v| acc + v);
        assert_eq!(sketch(&values).sum(), expected);
    }

    #[test]
    fn invalid_observation() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = Sketch::from_values([1.0, value, 2.0]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Domain, "value {} should be rejected", value);
        }
    }

    #[test]
    fn invalid_gamma() {
        let config: SketchConfiguration = serde_json::from_str(r#"{"gamma": 0.9}"#).unwrap();
        let err = Sketch::new(&config, [1.0]).unwrap_err();
        assert_eq!(err, SketchError::InvalidGamma { gamma: 0.9 });
    }

    #[test]
    fn encode_single_value() {
        let raw = sketch(&[1.0]).raw().unwrap();

        let mut expected = vec![0x01];
        expected.extend_from_slice(&DEFAULT_GAMMA.to_le_bytes());
        expected.extend_from_slice(&1.0f64.to_le_bytes());
        expected.extend_from_slice(&[0x01, 0x00, 0x01]);
        assert_eq!(raw, expected);
        assert_eq!(raw.len(), sketch(&[1.0]).encoded_len());
    }

    #[test]
    fn encode_hex() {
        assert_eq!(
            sketch(&[1.0]).hex().unwrap(),
            "01fd4a815abf52f03f000000000000f03f010001"
        );
        assert_eq!(
            sketch(&[10.0, 100.0]).hex().unwrap(),
            "01fd4a815abf52f03f0000000000805b400274017301"
        );
    }

    #[test]
    fn encode_empty() {
        let sketch = Sketch::empty(&SketchConfiguration::default()).unwrap();
        let raw = sketch.raw().unwrap();
        assert_eq!(raw.len(), HEADER_LEN + 1);
        assert_eq!(raw[HEADER_LEN], 0x00);
    }

    #[test]
    fn encode_negative_first_key() {
        // 0.5 maps to a negative bucket index, so the first delta from the implicit zero key is negative.
        let sketch = sketch(&[0.5, 2.0]);
        assert!(sketch.buckets().next().unwrap().0 < 0);

        let mut buf = vec![0xFF];
        let err = sketch.encode_into(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
        assert_eq!(buf, vec![0xFF]);

        assert!(sketch.hex().is_err());
    }

    #[test]
    fn encode_appends() {
        let sketch = sketch(&[5.0]);
        let mut buf = vec![0xAB, 0xCD];
        sketch.encode_into(&mut buf).unwrap();
        assert_eq!(&buf[..2], &[0xAB, 0xCD]);
        assert_eq!(&buf[2..], &sketch.raw().unwrap()[..]);
    }

    #[test]
    fn merge_doubles_buckets() {
        let a = sketch(&[10.0, 100.0]);
        let merged = a.merge(&a).unwrap();
        assert_eq!(merged.count(), 4);
        assert_eq!(merged.sum(), 220.0);
        assert_eq!(merged.buckets().collect::<Vec<_>>(), vec![(116, 2), (231, 2)]);

        // Operands are untouched.
        assert_eq!(a.count(), 2);
    }

    #[test]
    fn merge_disjoint() {
        let a = sketch(&[1.0, 2.0]);
        let b = sketch(&[3.0]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.buckets().collect::<Vec<_>>(), vec![(0, 1), (35, 1), (55, 1)]);
        assert_eq!(merged, sketch(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn merge_version_mismatch() {
        let a = sketch(&[1.0]);
        let config = SketchConfiguration::default().with_version(2);
        let b = Sketch::new(&config, [1.0]).unwrap();

        let err = a.merge(&b).unwrap_err();
        assert_eq!(err, SketchError::VersionMismatch { left: 1, right: 2 });
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn merge_gamma_mismatch() {
        let a = sketch(&[1.0]);
        let b = Sketch::new(&SketchConfiguration::with_relative_accuracy(0.02).unwrap(), [1.0]).unwrap();

        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, SketchError::GammaMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn merge_gamma_requires_exact_equality() {
        let a = sketch(&[1.0]);
        let nudged = f64::from_bits(DEFAULT_GAMMA.to_bits() + 1);
        let b = Sketch::new(&SketchConfiguration::new(1, nudged).unwrap(), [1.0]).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn config_round_trip() {
        let config = SketchConfiguration::new(4, 1.5).unwrap();
        let sketch = Sketch::new(&config, [1.0]).unwrap();
        assert_eq!(sketch.config(), config);
        assert!(crate::float_eq(sketch.relative_accuracy(), 0.2));
    }

    #[test]
    fn display() {
        let sketch = sketch(&[10.0, 100.0, 100.0]);
        assert_eq!(
            sketch.to_string(),
            format!(
                "Sketch<version: 1, sum: 210, count: 3, gamma: {}, bucket_count: 2, buckets: {{116: 1, 231: 2}}>",
                DEFAULT_GAMMA
            )
        );

        let empty = Sketch::empty(&SketchConfiguration::default()).unwrap();
        assert!(empty.to_string().ends_with("bucket_count: 0, buckets: {}>"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json() {
        let sketch = sketch(&[10.0, 100.0, 100.0]);
        let value = serde_json::to_value(&sketch).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "version": 1,
                "sum": 210.0,
                "count": 3,
                "gamma": DEFAULT_GAMMA,
                "buckets": { "116": 1, "231": 2 },
            })
        );
    }

    fn arb_values() -> impl Strategy<Value = Vec<f64>> {
        // Kept at or above one so every sketch is encodable.
        arb_vec(1.0f64..1e9, 0..64)
    }

    proptest! {
        #[test]
        fn property_test_count_matches_buckets(values in arb_vec(1e-9f64..1e9, 0..64)) {
            let sketch = sketch(&values);
            prop_assert_eq!(sketch.count(), values.len() as u64);
            prop_assert_eq!(sketch.buckets().map(|(_, n)| n).sum::<u64>(), sketch.count());
        }

        #[test]
        fn property_test_merge_additive(a in arb_values(), b in arb_values()) {
            let (a, b) = (sketch(&a), sketch(&b));
            let merged = a.merge(&b).unwrap();
            prop_assert_eq!(merged.count(), a.count() + b.count());
            prop_assert_eq!(merged.sum(), a.sum() + b.sum());
        }

        #[test]
        fn property_test_merge_commutative(a in arb_values(), b in arb_values()) {
            let (a, b) = (sketch(&a), sketch(&b));
            prop_assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
        }

        #[test]
        fn property_test_merge_associative(a in arb_values(), b in arb_values(), c in arb_values()) {
            let (a, b, c) = (sketch(&a), sketch(&b), sketch(&c));
            let left = a.merge(&b).unwrap().merge(&c).unwrap();
            let right = a.merge(&b.merge(&c).unwrap()).unwrap();
            prop_assert_eq!(left.buckets().collect::<Vec<_>>(), right.buckets().collect::<Vec<_>>());
            prop_assert_eq!(left.count(), right.count());
        }

        #[test]
        fn property_test_merge_identity(a in arb_values()) {
            let a = sketch(&a);
            let empty = Sketch::empty(&a.config()).unwrap();
            prop_assert_eq!(&a.merge(&empty).unwrap(), &a);
            prop_assert_eq!(&empty.merge(&a).unwrap(), &a);
        }

        #[test]
        fn property_test_merge_matches_combined_construction(a in arb_values(), b in arb_values()) {
            let merged = sketch(&a).merge(&sketch(&b)).unwrap();
            let combined = sketch(&[a, b].concat());
            prop_assert_eq!(merged.buckets().collect::<Vec<_>>(), combined.buckets().collect::<Vec<_>>());
            prop_assert_eq!(merged.count(), combined.count());
        }

        #[test]
        fn property_test_encoding_deterministic(a in arb_values()) {
            let a = sketch(&a);
            let first = a.raw().unwrap();
            prop_assert_eq!(&first, &a.raw().unwrap());
            prop_assert_eq!(&first, &a.clone().raw().unwrap());
            prop_assert_eq!(first.len(), a.encoded_len());
        }
    }
}
