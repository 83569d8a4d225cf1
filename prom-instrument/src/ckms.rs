//! Streaming quantile estimation.
//!
//! This is the targeted-quantiles variant of the algorithm described by Cormode, Korn,
//! Muthukrishnan and Srivastava in "Effective Computation of Biased Quantiles over Data
//! Streams". The estimator keeps an ordered list of samples `(value, g, delta)`, where `g` is
//! the rank difference to the previous sample and `delta` the uncertainty of the sample's rank.
//! The allowed `g + delta` at any rank is given by the band function `f`, which is tightest
//! around the configured target quantiles.
//!
//! Values are buffered and merged into the sample list in sorted batches, and the list is
//! compressed every [`COMPRESS_INTERVAL`] inserts as well as before every query.

use crate::error::{ArgumentError, QuantileError};

/// Number of inserts between compressions, and the size of the insert buffer.
pub const COMPRESS_INTERVAL: usize = 128;

/// A quantile to track, with its allowed rank error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantileTarget {
    quantile: f64,
    epsilon: f64,
    u: f64,
    v: f64,
}

impl QuantileTarget {
    /// Creates a new target.
    ///
    /// Both `quantile` and `epsilon` must be within `[0, 1]`. A quantile of `0` or `1` tracks the
    /// exact minimum or maximum, and an epsilon of `0` keeps every observation.
    pub fn new(quantile: f64, epsilon: f64) -> Result<Self, ArgumentError> {
        if !(0.0..=1.0).contains(&quantile) || !(0.0..=1.0).contains(&epsilon) {
            return Err(ArgumentError::InvalidQuantile { quantile, epsilon });
        }

        Ok(Self {
            quantile,
            epsilon,
            u: 2.0 * epsilon / (1.0 - quantile),
            v: 2.0 * epsilon / quantile,
        })
    }

    /// The targeted quantile.
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// Allowed rank error, as a fraction of the number of observations.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn is_extreme(&self) -> bool {
        self.quantile == 0.0 || self.quantile == 1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    value: f64,
    g: u64,
    delta: u64,
}

/// A CKMS quantile estimator.
///
/// Not synchronized: callers with concurrent writers wrap it in a lock.
#[derive(Clone, Debug)]
pub struct Ckms {
    targets: Vec<QuantileTarget>,
    samples: Vec<Sample>,
    n: u64,
    buffer: Vec<f64>,
    inserts_since_compress: usize,
}

impl Ckms {
    /// Creates an estimator for the given targets.
    ///
    /// Returns `None` if `targets` is empty.
    pub fn new(targets: &[QuantileTarget]) -> Option<Self> {
        if targets.is_empty() {
            return None;
        }

        Some(Self {
            targets: targets.to_vec(),
            samples: Vec::new(),
            n: 0,
            buffer: Vec::with_capacity(COMPRESS_INTERVAL),
            inserts_since_compress: 0,
        })
    }

    /// The configured targets.
    pub fn targets(&self) -> &[QuantileTarget] {
        &self.targets
    }

    /// Total number of observations, including buffered ones.
    pub fn count(&self) -> u64 {
        self.n + self.buffer.len() as u64
    }

    /// Number of samples currently retained.
    pub fn retained(&self) -> usize {
        self.samples.len()
    }

    /// Records an observation.
    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        if self.buffer.len() == COMPRESS_INTERVAL {
            self.flush();
        }

        self.inserts_since_compress += 1;
        if self.inserts_since_compress == COMPRESS_INTERVAL {
            self.compress();
            self.inserts_since_compress = 0;
        }
    }

    /// Estimates the value at `quantile`, which must be one of the configured targets.
    pub fn get(&mut self, quantile: f64) -> Result<f64, QuantileError> {
        if !self.targets.iter().any(|t| t.quantile == quantile) {
            return Err(QuantileError::UntrackedQuantile(quantile));
        }

        self.flush();
        self.compress();

        let (first, last) = match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (first.value, last.value),
            _ => return Err(QuantileError::NoData),
        };
        if quantile == 0.0 {
            return Ok(first);
        }
        if quantile == 1.0 {
            return Ok(last);
        }

        let desired = (quantile * self.n as f64).ceil() as u64;
        let upper = desired + self.band(desired) / 2;

        let mut r = 0;
        for (idx, sample) in self.samples.iter().enumerate() {
            if r + sample.g + sample.delta > upper {
                let chosen = if idx > 0 { &self.samples[idx - 1] } else { sample };
                return Ok(chosen.value);
            }
            r += sample.g;
        }
        Ok(last)
    }

    /// Clears all observations.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.n = 0;
        self.inserts_since_compress = 0;
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut batch = std::mem::take(&mut self.buffer);
        batch.sort_unstable_by(f64::total_cmp);
        self.insert_batch(&batch);
        batch.clear();
        self.buffer = batch;
    }

    /// Merges a sorted batch of values into the sample list.
    fn insert_batch(&mut self, sorted: &[f64]) {
        let existing = std::mem::take(&mut self.samples);
        let mut merged = Vec::with_capacity(existing.len() + sorted.len());

        let mut i = 0;
        // Sum of the g's left of the current sample.
        let mut r = 0;
        for item in existing {
            while i < sorted.len() && sorted[i] <= item.value {
                let delta = self.band(r).saturating_sub(1).min(self.n);
                merged.push(Sample { value: sorted[i], g: 1, delta });
                r += 1;
                i += 1;
                self.n += 1;
            }
            r += item.g;
            merged.push(item);
        }
        for &value in &sorted[i..] {
            merged.push(Sample { value, g: 1, delta: 0 });
            self.n += 1;
        }

        self.samples = merged;
    }

    /// Merges adjacent samples while the band allows it.
    ///
    /// Walks from the highest sample down, folding each sample into its right neighbour. The
    /// first and last samples are always kept, so the exact minimum and maximum survive.
    fn compress(&mut self) {
        let len = self.samples.len();
        if len < 3 {
            return;
        }

        let old = std::mem::take(&mut self.samples);
        let mut kept = Vec::with_capacity(len);

        let mut right = old[len - 1];
        let mut r = self.n - right.g;
        for idx in (1..len - 1).rev() {
            let left = old[idx];
            r -= left.g;
            if left.g + right.g + right.delta < self.band(r) {
                right.g += left.g;
            } else {
                kept.push(right);
                right = left;
            }
        }
        kept.push(right);
        kept.push(old[0]);
        kept.reverse();

        self.samples = kept;
    }

    /// Maximum tolerable `g + delta` at rank `r`.
    fn band(&self, r: u64) -> u64 {
        let n = self.n as f64;
        let r = r as f64;

        let mut min = u64::MAX;
        for target in self.targets.iter().filter(|t| !t.is_extreme()) {
            let result = if r >= target.quantile * n {
                target.v * r + 0.00000000001
            } else {
                target.u * (n - r) + 0.00000000001
            };
            min = min.min(result as u64);
        }
        min.max(1)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn target(quantile: f64, epsilon: f64) -> QuantileTarget {
        QuantileTarget::new(quantile, epsilon).unwrap()
    }

    fn shuffled_values(n: usize, seed: u64) -> Vec<f64> {
        let mut values = (1..=n).map(|v| v as f64).collect::<Vec<_>>();
        values.shuffle(&mut StdRng::seed_from_u64(seed));
        values
    }

    /// Every sample must satisfy `g + delta <= f(r)`, samples must be ordered, and the g's must
    /// add up to the number of observations.
    fn validate_samples(ckms: &Ckms) {
        let mut previous = f64::NEG_INFINITY;
        let mut r = 0;
        for sample in &ckms.samples {
            assert!(
                sample.g + sample.delta <= ckms.band(r),
                "invalid sample {sample:?}: n={} r={r} f(r)={}",
                ckms.n,
                ckms.band(r)
            );
            assert!(previous <= sample.value, "samples are not ordered");
            previous = sample.value;
            r += sample.g;
        }
        assert_eq!(r, ckms.n, "the sum of all g's must be the number of observations");
    }

    /// Inputs are always the numbers 1 to n, so the value is its own rank.
    fn validate_results(ckms: &mut Ckms) {
        let n = ckms.count() as f64;
        for t in ckms.targets().to_vec() {
            let actual = ckms.get(t.quantile()).unwrap();
            let (lower, upper) = if t.quantile() == 0.0 {
                (1.0, 1.0)
            } else if t.quantile() == 1.0 {
                (n, n)
            } else {
                (
                    (n * (t.quantile() - t.epsilon())).floor(),
                    (n * (t.quantile() + t.epsilon())).ceil(),
                )
            };
            assert!(
                actual >= lower && actual <= upper,
                "{t:?}: {actual} not in [{lower}, {upper}], n={n}"
            );
        }
    }

    #[test]
    fn test_invalid_targets() {
        assert!(QuantileTarget::new(-1.0, 0.0).is_err());
        assert!(QuantileTarget::new(0.95, 2.0).is_err());
        assert!(QuantileTarget::new(f64::NAN, 0.01).is_err());
        assert!(Ckms::new(&[]).is_none());
    }

    #[test]
    fn test_get_on_empty_stream() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01), target(0.95, 0.005)]).unwrap();
        assert_eq!(ckms.get(0.95), Err(QuantileError::NoData));
    }

    #[test]
    fn test_get_untracked_quantile() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01)]).unwrap();
        ckms.insert(1.0);
        assert_eq!(ckms.get(0.9), Err(QuantileError::UntrackedQuantile(0.9)));
    }

    #[test]
    fn test_get_small_stream() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01), target(0.95, 0.005), target(0.99, 0.001)])
            .unwrap();
        for value in shuffled_values(100, 0) {
            ckms.insert(value);
        }
        validate_results(&mut ckms);
    }

    #[test]
    fn test_batch_insert_keeps_invariants() {
        for (batch_size, compress_interval, total, seed) in [
            (1, 1, 100, 1),
            (1, 10, 100, 2),
            (2, 10, 100, 3),
            (2, 110, 100, 4),
            (3, 10, 100, 5),
            (10, 10, 100, 6),
            (128, 128, 1, 7),
            (128, 128, 1_000, 8),
            (128, 128, 10_000, 9),
            (128, 128, 100_000, 10),
        ] {
            let mut ckms = Ckms::new(&[target(0.5, 0.01), target(0.95, 0.005)]).unwrap();
            let input = shuffled_values(total, seed);
            let mut inserts_since_compress = 0;
            for chunk in input.chunks(batch_size) {
                let mut batch = chunk.to_vec();
                batch.sort_unstable_by(f64::total_cmp);
                ckms.insert_batch(&batch);
                validate_samples(&ckms);

                inserts_since_compress += batch.len();
                if inserts_since_compress >= compress_interval {
                    ckms.compress();
                    validate_samples(&ckms);
                    inserts_since_compress = 0;
                }
            }
            validate_results(&mut ckms);
        }
    }

    #[test]
    fn test_million_shuffled_values() {
        let targets =
            [target(0.50, 0.05), target(0.90, 0.01), target(0.95, 0.005), target(0.99, 0.001)];
        let mut ckms = Ckms::new(&targets).unwrap();

        let mut values = (0..1_000_000).map(|v| v as f64).collect::<Vec<_>>();
        values.shuffle(&mut StdRng::seed_from_u64(2));
        for value in values {
            ckms.insert(value);
        }

        let n = 1_000_000.0;
        for t in targets {
            let actual = ckms.get(t.quantile()).unwrap();
            // Values are 0-based, so the rank of a value is one more than the value itself.
            let rank = actual + 1.0;
            let tolerance = t.epsilon() * n;
            assert!(
                (rank - t.quantile() * n).abs() <= tolerance,
                "{t:?}: rank {rank} is more than {tolerance} away from {}",
                t.quantile() * n
            );
        }
        assert!(ckms.retained() < 1000, "retained {} samples", ckms.retained());
    }

    #[test]
    fn test_min_and_max_only() {
        for (targets, seed) in [
            (vec![target(0.0, 0.0)], 3),
            (vec![target(1.0, 0.0)], 4),
            (vec![target(0.0, 0.0), target(1.0, 0.0)], 5),
        ] {
            let mut ckms = Ckms::new(&targets).unwrap();
            for value in shuffled_values(1000, seed) {
                ckms.insert(value);
            }
            validate_results(&mut ckms);
            ckms.compress();
            assert_eq!(ckms.retained(), 2);
        }
    }

    #[test]
    fn test_extremes_with_others() {
        let mut ckms = Ckms::new(&[target(0.95, 0.005), target(0.0, 0.0)]).unwrap();
        for value in shuffled_values(1000, 6) {
            ckms.insert(value);
        }
        validate_results(&mut ckms);
        assert!(ckms.retained() < 200);

        let mut ckms = Ckms::new(&[
            target(0.0, 0.0),
            target(0.5, 0.01),
            target(0.95, 0.005),
            target(0.99, 0.001),
            target(1.0, 0.0),
        ])
        .unwrap();
        for value in shuffled_values(10_000, 8) {
            ckms.insert(value);
        }
        validate_results(&mut ckms);
        assert!(ckms.retained() < 200);
    }

    #[test]
    fn test_zero_epsilon_keeps_everything() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01), target(0.95, 0.0), target(0.99, 0.001)])
            .unwrap();
        for value in shuffled_values(10_000, 10) {
            ckms.insert(value);
        }
        validate_results(&mut ckms);
        assert_eq!(ckms.retained(), 10_000);
    }

    #[test]
    fn test_max_epsilon_does_not_fail() {
        let mut ckms = Ckms::new(&[target(0.95, 1.0)]).unwrap();
        for value in shuffled_values(10_000, 12) {
            ckms.insert(value);
        }
        validate_results(&mut ckms);
    }

    #[test]
    fn test_ties_are_all_counted() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01)]).unwrap();
        for _ in 0..1000 {
            ckms.insert(7.0);
        }
        assert_eq!(ckms.count(), 1000);
        assert_eq!(ckms.get(0.5), Ok(7.0));
        validate_samples(&ckms);
    }

    #[test]
    fn test_reset() {
        let mut ckms = Ckms::new(&[target(0.5, 0.01)]).unwrap();
        ckms.insert(1.0);
        ckms.reset();
        assert_eq!(ckms.count(), 0);
        assert_eq!(ckms.get(0.5), Err(QuantileError::NoData));
    }

    proptest! {
        #[test]
        fn test_any_insertion_order(values in proptest::collection::vec(0u32..10_000, 1..2_000)) {
            let mut values = values;
            values.sort_unstable();
            values.dedup();
            let n = values.len();
            let mut ordered = values.iter().map(|v| f64::from(*v)).collect::<Vec<_>>();
            let sorted = ordered.clone();
            ordered.shuffle(&mut StdRng::seed_from_u64(n as u64));

            let mut ckms = Ckms::new(&[target(0.5, 0.01), target(0.9, 0.01)]).unwrap();
            for value in ordered {
                ckms.insert(value);
            }
            validate_samples(&ckms);

            for q in [0.5, 0.9] {
                let actual = ckms.get(q).unwrap();
                let rank = sorted.partition_point(|v| *v <= actual) as f64;
                let tolerance = (0.01 * n as f64).ceil() + 1.0;
                prop_assert!((rank - q * n as f64).abs() <= tolerance,
                    "q={} rank={} n={}", q, rank, n);
            }
        }
    }
}
