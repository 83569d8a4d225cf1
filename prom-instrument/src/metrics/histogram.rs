use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::timer::{Observe, Timer};
use super::{common_builder_methods, unit_builder_method, CommonBuilder, Family};
use crate::atomics::{AtomicF64, AtomicU64};
use crate::clock::Clock;
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::exemplar::{Exemplar, ExemplarSampler, NoopExemplarSampler};
use crate::labels::Labels;
use crate::snapshot::{Bucket, FamilyData, HistogramPoint, Metadata, MetricFamily, MetricType};

/// Default bucket upper bounds, tuned for request latencies in seconds. `+Inf` is implied.
pub const DEFAULT_BUCKETS: [f64; 11] =
    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// `count` bucket bounds starting at `start`, each `width` apart.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>, ArgumentError> {
    if count == 0 || width.is_nan() || width <= 0.0 || !start.is_finite() {
        return Err(ArgumentError::InvalidBuckets(format!(
            "linear buckets need a positive count and width, got count {count}, width {width}"
        )));
    }
    Ok((0..count).map(|i| start + width * i as f64).collect())
}

/// `count` bucket bounds starting at `start`, each `factor` times the previous one.
pub fn exponential_buckets(
    start: f64,
    factor: f64,
    count: usize,
) -> Result<Vec<f64>, ArgumentError> {
    if count == 0 || start.is_nan() || start <= 0.0 || factor.is_nan() || factor <= 1.0 {
        return Err(ArgumentError::InvalidBuckets(format!(
            "exponential buckets need a positive count and start and a factor above 1, \
             got count {count}, start {start}, factor {factor}"
        )));
    }
    Ok((0..count)
        .scan(start, |bound, _| {
            let current = *bound;
            *bound *= factor;
            Some(current)
        })
        .collect())
}

/// Counts observations in configurable buckets.
pub struct Histogram {
    metadata: Metadata,
    family: Family<HistogramSeries>,
    unlabeled: Option<Arc<HistogramSeries>>,
    bounds: Arc<[f64]>,
    sampler: Arc<dyn ExemplarSampler>,
    clock: Arc<dyn Clock>,
}

/// One series of a [`Histogram`].
pub struct HistogramSeries {
    bounds: Arc<[f64]>,
    counts: Box<[AtomicU64]>,
    sum: AtomicF64,
    exemplars: Box<[ArcSwapOption<Exemplar>]>,
    created_millis: i64,
    sampler: Arc<dyn ExemplarSampler>,
    clock: Arc<dyn Clock>,
}

impl HistogramSeries {
    fn new(bounds: Arc<[f64]>, sampler: Arc<dyn ExemplarSampler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            counts: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            exemplars: bounds.iter().map(|_| ArcSwapOption::empty()).collect(),
            bounds,
            sum: AtomicF64::new(0.0),
            created_millis: clock.now_millis(),
            sampler,
            clock,
        }
    }

    /// Records an observation. NaN is ignored.
    pub fn observe(&self, value: f64) {
        self.record(value);
    }

    /// Records an observation and offers it to the exemplar sampler of its bucket.
    pub fn observe_with_exemplar(&self, value: f64) {
        if let Some(bucket) = self.record(value) {
            let slot = &self.exemplars[bucket];
            let previous = slot.load();
            if let Some(exemplar) = self.sampler.sample(value, previous.as_deref()) {
                slot.store(Some(Arc::new(exemplar)));
            }
        }
    }

    /// Records an observation, attaching an exemplar with the given labels.
    pub fn observe_with_labels_exemplar(
        &self,
        value: f64,
        exemplar_labels: Labels,
    ) -> Result<(), ArgumentError> {
        let exemplar = Exemplar::new(value, exemplar_labels, Some(self.clock.now_millis()))?;
        if let Some(bucket) = self.record(value) {
            self.exemplars[bucket].store(Some(Arc::new(exemplar)));
        }
        Ok(())
    }

    /// Starts a timer that observes the elapsed seconds when dropped.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer::start(self)
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Sum of all observations.
    pub fn sum(&self) -> f64 {
        self.sum.get()
    }

    fn record(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        // The last bound is `+Inf`, so every non-NaN value has a bucket.
        let bucket = self.bounds.partition_point(|bound| *bound < value);
        self.counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        Some(bucket)
    }

    /// Snapshots the series.
    ///
    /// Bucket counts and the sum are separate atomics read without a common lock, so an
    /// observation recorded during the snapshot may be reflected in the counts but not yet in
    /// the sum. This is accepted: writers never wait for a scrape.
    fn point(&self, labels: Labels) -> HistogramPoint {
        let buckets = self
            .bounds
            .iter()
            .zip(self.counts.iter())
            .map(|(bound, count)| Bucket {
                upper_bound: *bound,
                count: count.load(Ordering::Relaxed),
            })
            .collect();
        let exemplars = self
            .exemplars
            .iter()
            .filter_map(|slot| slot.load_full())
            .map(|exemplar| (*exemplar).clone())
            .collect();
        HistogramPoint {
            labels,
            buckets,
            sum: self.sum(),
            exemplars,
            created_millis: Some(self.created_millis),
            scrape_timestamp_millis: None,
        }
    }
}

impl Observe for HistogramSeries {
    fn observe_seconds(&self, seconds: f64) {
        self.observe(seconds);
    }
}

impl Histogram {
    /// Starts building a histogram with [`DEFAULT_BUCKETS`].
    pub fn builder(name: impl Into<String>) -> HistogramBuilder {
        HistogramBuilder {
            common: CommonBuilder::new(name),
            buckets: DEFAULT_BUCKETS.to_vec(),
            sampler: Arc::new(NoopExemplarSampler),
        }
    }

    /// The metric name, including the unit suffix.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Upper bounds of the buckets, ending with `+Inf`.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Gets the series for the given label values, in the order the label names were declared.
    pub fn with_label_values<V: AsRef<str>>(
        &self,
        values: &[V],
    ) -> Result<Arc<HistogramSeries>, LabelError> {
        self.family.get_or_create(values, || self.new_series())
    }

    /// Gets the series for the given `(name, value)` label pairs, in any order.
    pub fn with_labels(
        &self,
        labels: &[(&str, &str)],
    ) -> Result<Arc<HistogramSeries>, ArgumentError> {
        let values = self.family.values_by_name(labels)?;
        Ok(self.with_label_values(&values)?)
    }

    /// Removes the series for the given label values, returning whether it existed.
    pub fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        self.family.remove(values)
    }

    /// Removes every labeled series. An unlabeled histogram keeps its single series.
    pub fn clear(&self) {
        self.family.clear();
        if let Some(series) = &self.unlabeled {
            self.family.insert(Labels::empty(), Arc::clone(series));
        }
    }

    /// Records an observation on the series without labels.
    pub fn observe(&self, value: f64) -> Result<(), LabelError> {
        self.unlabeled().map(|s| s.observe(value))
    }

    /// Records an observation on the series without labels and offers it to the exemplar sampler.
    pub fn observe_with_exemplar(&self, value: f64) -> Result<(), LabelError> {
        self.unlabeled().map(|s| s.observe_with_exemplar(value))
    }

    /// Starts a timer on the series without labels.
    pub fn start_timer(&self) -> Result<Timer<'_>, LabelError> {
        self.unlabeled().map(HistogramSeries::start_timer)
    }

    fn unlabeled(&self) -> Result<&HistogramSeries, LabelError> {
        self.unlabeled.as_deref().ok_or(LabelError::ArityMismatch {
            expected: self.family.label_names().len(),
            actual: 0,
        })
    }

    fn new_series(&self) -> HistogramSeries {
        HistogramSeries::new(
            Arc::clone(&self.bounds),
            Arc::clone(&self.sampler),
            Arc::clone(&self.clock),
        )
    }
}

impl Collector for Histogram {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, series)| series.point(labels))
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::Histogram(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::Histogram,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`Histogram`].
#[must_use]
pub struct HistogramBuilder {
    common: CommonBuilder,
    buckets: Vec<f64>,
    sampler: Arc<dyn ExemplarSampler>,
}

impl HistogramBuilder {
    common_builder_methods!();
    unit_builder_method!();

    /// Sets the bucket upper bounds. They must be strictly increasing; `+Inf` is appended if
    /// missing.
    ///
    /// Defaults to [`DEFAULT_BUCKETS`].
    pub fn buckets(mut self, buckets: impl Into<Vec<f64>>) -> Self {
        self.buckets = buckets.into();
        self
    }

    /// Sets the sampler consulted by `observe_with_exemplar`.
    pub fn exemplar_sampler(mut self, sampler: Arc<dyn ExemplarSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Builds the histogram.
    ///
    /// Fails if the buckets are not strictly increasing or if `le` is declared as a label.
    pub fn build(self) -> Result<Histogram, ArgumentError> {
        let common = self.common.build(None, &["le"])?;
        let bounds = validate_buckets(self.buckets)?;

        let mut histogram = Histogram {
            metadata: common.metadata,
            family: Family::new(common.label_names),
            unlabeled: None,
            bounds: bounds.into(),
            sampler: self.sampler,
            clock: common.clock,
        };
        if histogram.family.label_names().is_empty() {
            let series = Arc::new(histogram.new_series());
            histogram.family.insert(Labels::empty(), Arc::clone(&series));
            histogram.unlabeled = Some(series);
        }
        Ok(histogram)
    }
}

fn validate_buckets(mut buckets: Vec<f64>) -> Result<Vec<f64>, ArgumentError> {
    if buckets.iter().any(|b| b.is_nan()) {
        return Err(ArgumentError::InvalidBuckets("bucket bounds must not be NaN".into()));
    }
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ArgumentError::InvalidBuckets(format!(
            "bucket bounds must be strictly increasing, got {buckets:?}"
        )));
    }
    if buckets.last() != Some(&f64::INFINITY) {
        buckets.push(f64::INFINITY);
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSample;

    impl ExemplarSampler for AlwaysSample {
        fn sample(&self, value: f64, _: Option<&Exemplar>) -> Option<Exemplar> {
            Exemplar::new(value, Labels::of(&["trace_id"], &["t"]).ok()?, Some(7)).ok()
        }
    }

    fn point(histogram: &Histogram) -> HistogramPoint {
        match histogram.collect().unwrap().remove(0).into_parts().1 {
            FamilyData::Histogram(mut points) => points.remove(0),
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn test_bucket_helpers() {
        assert_eq!(linear_buckets(1.0, 2.0, 3).unwrap(), vec![1.0, 3.0, 5.0]);
        assert_eq!(exponential_buckets(1.0, 10.0, 3).unwrap(), vec![1.0, 10.0, 100.0]);
        assert!(linear_buckets(1.0, 0.0, 3).is_err());
        assert!(linear_buckets(1.0, 1.0, 0).is_err());
        assert!(exponential_buckets(0.0, 2.0, 3).is_err());
        assert!(exponential_buckets(1.0, 1.0, 3).is_err());
    }

    #[test]
    fn test_bucket_validation() {
        let build = |buckets: Vec<f64>| Histogram::builder("latency").buckets(buckets).build();
        assert!(build(vec![1.0, f64::NAN]).is_err());
        assert!(build(vec![2.0, 1.0]).is_err());
        assert!(build(vec![1.0, 1.0]).is_err());
        assert_eq!(build(vec![1.0, 2.0]).unwrap().bounds(), &[1.0, 2.0, f64::INFINITY]);
        assert_eq!(build(vec![1.0, f64::INFINITY]).unwrap().bounds(), &[1.0, f64::INFINITY]);
        assert_eq!(build(vec![]).unwrap().bounds(), &[f64::INFINITY]);
        assert_eq!(Histogram::builder("latency").build().unwrap().bounds().len(), 12);
    }

    #[test]
    fn test_le_is_reserved() {
        let result = Histogram::builder("latency").label_names(["le"]).build();
        assert_eq!(result.err(), Some(ArgumentError::Label(LabelError::ReservedName("le".into()))));
    }

    #[test]
    fn test_observations_land_in_buckets() {
        let histogram = Histogram::builder("latency").buckets(vec![1.0, 5.0]).build().unwrap();
        for value in [0.5, 1.0, 3.0, 5.0, 7.0, f64::NAN] {
            histogram.observe(value).unwrap();
        }

        let point = point(&histogram);
        let counts = point.buckets.iter().map(|b| b.count).collect::<Vec<_>>();
        assert_eq!(counts, vec![2, 2, 1]);
        assert_eq!(point.count(), 5);
        assert_eq!(point.sum, 16.5);
    }

    #[test]
    fn test_one_exemplar_per_bucket() {
        let histogram = Histogram::builder("latency")
            .buckets(vec![1.0, 5.0])
            .exemplar_sampler(Arc::new(AlwaysSample))
            .build()
            .unwrap();
        histogram.observe_with_exemplar(0.5).unwrap();
        histogram.observe_with_exemplar(0.7).unwrap();
        histogram.observe_with_exemplar(10.0).unwrap();

        let point = point(&histogram);
        let values = point.exemplars.iter().map(Exemplar::value).collect::<Vec<_>>();
        assert_eq!(values, vec![0.7, 10.0]);
    }

    #[test]
    fn test_concurrent_snapshots_only_lag_behind() {
        use std::thread;

        let histogram =
            Arc::new(Histogram::builder("latency").buckets(vec![1.0]).build().unwrap());
        let writers = (0..4)
            .map(|_| {
                let histogram = Arc::clone(&histogram);
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        histogram.observe(1.0).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut last_count = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            let point = point(&histogram);
            assert!(point.count() >= last_count);
            last_count = point.count();
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let point = point(&histogram);
        assert_eq!(point.count(), 20_000);
        assert_eq!(point.sum, 20_000.0);
    }

    #[test]
    fn test_timer() {
        let histogram = Histogram::builder("latency").build().unwrap();
        histogram.start_timer().unwrap().observe_duration();
        assert_eq!(point(&histogram).count(), 1);

        let labeled = Histogram::builder("latency").label_names(["path"]).build().unwrap();
        let series = labeled.with_label_values(&["/"]).unwrap();
        drop(series.start_timer());
        assert_eq!(series.count(), 1);
    }
}
