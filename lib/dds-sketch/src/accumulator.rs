use std::collections::BTreeMap;

use tracing::trace;

use crate::{config::SketchConfiguration, error::SketchError, mapping::LogarithmicMapping, sketch::Sketch};

type BucketMap = hashbrown::HashMap<i32, u64, foldhash::quality::RandomState>;

#[derive(Clone, Copy, Debug)]
struct Header {
    version: u8,
    mapping: LogarithmicMapping,
    sum: f64,
}

/// Folds many sketches into one.
///
/// Merging a large number of sketches pairwise with [`Sketch::merge`] copies the bucket map on every step. The
/// accumulator instead keeps a single hash-based bucket map that is updated in place, and only sorts the buckets once,
/// when [`to_sketch`][Self::to_sketch] is called.
///
/// The first sketch merged in determines the configuration (version and gamma) of the accumulator, and every subsequent
/// sketch must match it. Accumulating sketches `a`, `b`, and `c` produces the same result as
/// `a.merge(&b)?.merge(&c)?`.
///
/// The accumulator provides no internal synchronization; callers sharing one across threads must serialize access to
/// it themselves.
#[derive(Clone, Debug, Default)]
pub struct SketchAccumulator {
    header: Option<Header>,
    buckets: BucketMap,
    merged: usize,
}

impl SketchAccumulator {
    /// Creates an empty `SketchAccumulator`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no sketches have been merged in.
    pub fn is_empty(&self) -> bool {
        self.header.is_none()
    }

    /// Returns the number of sketches merged in since creation, or since the last call to [`clear`][Self::clear].
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Merges the given sketch into the accumulator.
    ///
    /// # Errors
    ///
    /// If the sketch has a different version or gamma than the sketches already merged in, an error is returned and
    /// the accumulator is left unchanged.
    pub fn merge(&mut self, sketch: &Sketch) -> Result<(), SketchError> {
        match self.header.as_mut() {
            Some(header) => {
                let config = SketchConfiguration::from_mapping(header.version, &header.mapping);
                config.check_compatible(&sketch.config())?;
                header.sum += sketch.sum();
            }
            None => {
                self.header = Some(Header {
                    version: sketch.version(),
                    mapping: *sketch.mapping(),
                    sum: sketch.sum(),
                });
            }
        }

        self.buckets.reserve(sketch.bucket_count());
        for (index, count) in sketch.buckets() {
            let existing = self.buckets.entry(index).or_insert(0);
            *existing = existing.saturating_add(count);
        }
        self.merged += 1;

        trace!(
            merged = self.merged,
            buckets = self.buckets.len(),
            "Merged sketch into accumulator."
        );

        Ok(())
    }

    /// Builds a sketch from everything merged in so far.
    ///
    /// Returns `None` if no sketches have been merged in.
    pub fn to_sketch(&self) -> Option<Sketch> {
        let header = self.header?;
        let buckets = self
            .buckets
            .iter()
            .map(|(&index, &count)| (index, count))
            .collect::<BTreeMap<_, _>>();

        Some(Sketch::from_parts(header.version, header.mapping, header.sum, buckets))
    }

    /// Clears the accumulator, including its configuration.
    pub fn clear(&mut self) {
        self.header = None;
        self.buckets.clear();
        self.merged = 0;
    }
}

impl Sketch {
    /// Merges all of the given sketches together.
    ///
    /// Returns `Ok(None)` if `sketches` is empty.
    ///
    /// # Errors
    ///
    /// If any two sketches have different versions or gamma values, an error is returned.
    pub fn merge_all<'a, I>(sketches: I) -> Result<Option<Sketch>, SketchError>
    where
        I: IntoIterator<Item = &'a Sketch>,
    {
        let mut accumulator = SketchAccumulator::new();
        for sketch in sketches {
            accumulator.merge(sketch)?;
        }

        Ok(accumulator.to_sketch())
    }
}
