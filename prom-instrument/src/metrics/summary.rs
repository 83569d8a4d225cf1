use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::timer::{Observe, Timer};
use super::{common_builder_methods, unit_builder_method, CommonBuilder, Family};
use crate::atomics::{AtomicF64, AtomicU64};
use crate::ckms::QuantileTarget;
use crate::clock::Clock;
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::exemplar::{Exemplar, ExemplarSampler, NoopExemplarSampler};
use crate::labels::Labels;
use crate::snapshot::{
    FamilyData, Metadata, MetricFamily, MetricType, QuantileValue, SummaryPoint,
};
use crate::window::{TimeWindowQuantiles, DEFAULT_AGE_BUCKETS, DEFAULT_MAX_AGE};

/// Tracks the count and sum of observations, and optionally quantiles over a sliding window.
pub struct Summary {
    metadata: Metadata,
    family: Family<SummarySeries>,
    unlabeled: Option<Arc<SummarySeries>>,
    config: Arc<WindowConfig>,
    sampler: Arc<dyn ExemplarSampler>,
}

struct WindowConfig {
    // Validated when the summary is built; every series starts from a restarted copy.
    template: Option<TimeWindowQuantiles>,
    clock: Arc<dyn Clock>,
}

/// One series of a [`Summary`].
pub struct SummarySeries {
    count: AtomicU64,
    sum: AtomicF64,
    quantiles: Option<Mutex<TimeWindowQuantiles>>,
    config: Arc<WindowConfig>,
    exemplar: ArcSwapOption<Exemplar>,
    created_millis: i64,
    sampler: Arc<dyn ExemplarSampler>,
}

impl SummarySeries {
    fn new(config: Arc<WindowConfig>, sampler: Arc<dyn ExemplarSampler>) -> Self {
        let quantiles =
            config.template.as_ref().map(|template| Mutex::new(template.restarted()));
        Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
            quantiles,
            created_millis: config.clock.now_millis(),
            config,
            exemplar: ArcSwapOption::empty(),
            sampler,
        }
    }

    /// Records an observation. NaN is ignored.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        if let Some(quantiles) = &self.quantiles {
            quantiles.lock().insert(value);
        }
    }

    /// Records an observation and offers it to the exemplar sampler.
    pub fn observe_with_exemplar(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        self.observe(value);
        let previous = self.exemplar.load();
        if let Some(exemplar) = self.sampler.sample(value, previous.as_deref()) {
            self.exemplar.store(Some(Arc::new(exemplar)));
        }
    }

    /// Records an observation, attaching an exemplar with the given labels.
    pub fn observe_with_labels_exemplar(
        &self,
        value: f64,
        exemplar_labels: Labels,
    ) -> Result<(), ArgumentError> {
        let exemplar =
            Exemplar::new(value, exemplar_labels, Some(self.config.clock.now_millis()))?;
        if !value.is_nan() {
            self.observe(value);
            self.exemplar.store(Some(Arc::new(exemplar)));
        }
        Ok(())
    }

    /// Starts a timer that observes the elapsed seconds when dropped.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer::start(self)
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    pub fn sum(&self) -> f64 {
        self.sum.get()
    }

    /// Current estimate of every configured quantile, NaN when the window is empty.
    pub fn quantiles(&self) -> Vec<QuantileValue> {
        let Some(quantiles) = &self.quantiles else {
            return Vec::new();
        };
        let mut window = quantiles.lock();
        let targets = window.targets().iter().map(QuantileTarget::quantile).collect::<Vec<_>>();
        targets
            .into_iter()
            .map(|quantile| QuantileValue {
                quantile,
                value: window.get(quantile).unwrap_or(f64::NAN),
            })
            .collect()
    }

    fn point(&self, labels: Labels) -> SummaryPoint {
        SummaryPoint {
            labels,
            count: self.count(),
            sum: self.sum(),
            quantiles: self.quantiles(),
            exemplars: self.exemplar.load_full().map(|e| vec![(*e).clone()]).unwrap_or_default(),
            created_millis: Some(self.created_millis),
            scrape_timestamp_millis: None,
        }
    }
}

impl Observe for SummarySeries {
    fn observe_seconds(&self, seconds: f64) {
        self.observe(seconds);
    }
}

impl Summary {
    /// Starts building a summary without quantiles.
    pub fn builder(name: impl Into<String>) -> SummaryBuilder {
        SummaryBuilder {
            common: CommonBuilder::new(name),
            quantiles: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            sampler: Arc::new(NoopExemplarSampler),
        }
    }

    /// The metric name, including the unit suffix.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Gets the series for the given label values, in the order the label names were declared.
    pub fn with_label_values<V: AsRef<str>>(
        &self,
        values: &[V],
    ) -> Result<Arc<SummarySeries>, LabelError> {
        self.family.get_or_create(values, || self.new_series())
    }

    /// Gets the series for the given `(name, value)` label pairs, in any order.
    pub fn with_labels(
        &self,
        labels: &[(&str, &str)],
    ) -> Result<Arc<SummarySeries>, ArgumentError> {
        let values = self.family.values_by_name(labels)?;
        Ok(self.with_label_values(&values)?)
    }

    /// Removes the series for the given label values, returning whether it existed.
    pub fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        self.family.remove(values)
    }

    /// Removes every labeled series.
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
        self.unlabeled().map(SummarySeries::start_timer)
    }

    fn unlabeled(&self) -> Result<&SummarySeries, LabelError> {
        self.unlabeled.as_deref().ok_or(LabelError::ArityMismatch {
            expected: self.family.label_names().len(),
            actual: 0,
        })
    }

    fn new_series(&self) -> SummarySeries {
        SummarySeries::new(Arc::clone(&self.config), Arc::clone(&self.sampler))
    }
}

impl Collector for Summary {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, series)| series.point(labels))
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::Summary(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::Summary,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`Summary`].
#[must_use]
pub struct SummaryBuilder {
    common: CommonBuilder,
    quantiles: Vec<(f64, f64)>,
    max_age: Duration,
    age_buckets: usize,
    sampler: Arc<dyn ExemplarSampler>,
}

impl SummaryBuilder {
    common_builder_methods!();
    unit_builder_method!();

    /// Tracks `quantile` with an allowed rank error of `epsilon`.
    ///
    /// Without any quantile, the summary only tracks count and sum.
    pub fn quantile(mut self, quantile: f64, epsilon: f64) -> Self {
        self.quantiles.push((quantile, epsilon));
        self
    }

    /// Sets how long observations are taken into account for quantiles.
    ///
    /// Defaults to [`DEFAULT_MAX_AGE`].
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets how many buckets the quantile window is split into.
    ///
    /// Defaults to [`DEFAULT_AGE_BUCKETS`].
    pub fn age_buckets(mut self, age_buckets: usize) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    /// Sets the sampler consulted by `observe_with_exemplar`.
    pub fn exemplar_sampler(mut self, sampler: Arc<dyn ExemplarSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Builds the summary.
    ///
    /// Fails if a quantile or epsilon is out of range, or if `quantile` is declared as a label.
    pub fn build(self) -> Result<Summary, ArgumentError> {
        let common = self.common.build(None, &["quantile"])?;

        let mut targets = self
            .quantiles
            .iter()
            .map(|(quantile, epsilon)| QuantileTarget::new(*quantile, *epsilon))
            .collect::<Result<Vec<_>, _>>()?;
        targets.sort_by(|a, b| a.quantile().total_cmp(&b.quantile()));
        if let Some(pair) = targets.windows(2).find(|pair| pair[0].quantile() == pair[1].quantile())
        {
            return Err(ArgumentError::InvalidQuantile {
                quantile: pair[1].quantile(),
                epsilon: pair[1].epsilon(),
            });
        }

        let template = if targets.is_empty() {
            None
        } else {
            let clock = Arc::clone(&common.clock);
            Some(TimeWindowQuantiles::new(&targets, self.max_age, self.age_buckets, clock)?)
        };
        let config = Arc::new(WindowConfig { template, clock: common.clock });

        let mut summary = Summary {
            metadata: common.metadata,
            family: Family::new(common.label_names),
            unlabeled: None,
            config,
            sampler: self.sampler,
        };
        if summary.family.label_names().is_empty() {
            let series = Arc::new(summary.new_series());
            summary.family.insert(Labels::empty(), Arc::clone(&series));
            summary.unlabeled = Some(series);
        }
        Ok(summary)
    }
}
