use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::{common_builder_methods, unit_builder_method, CommonBuilder, Family};
use crate::atomics::AtomicF64;
use crate::clock::Clock;
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::exemplar::{Exemplar, ExemplarSampler, NoopExemplarSampler};
use crate::labels::Labels;
use crate::snapshot::{CounterPoint, FamilyData, Metadata, MetricFamily, MetricType};

/// A monotonically increasing value.
///
/// The name is stored without a `_total` suffix; encoders append it.
pub struct Counter {
    metadata: Metadata,
    family: Family<CounterSeries>,
    unlabeled: Option<Arc<CounterSeries>>,
    sampler: Arc<dyn ExemplarSampler>,
    clock: Arc<dyn Clock>,
}

/// One series of a [`Counter`].
pub struct CounterSeries {
    value: AtomicF64,
    exemplar: ArcSwapOption<Exemplar>,
    created_millis: i64,
    sampler: Arc<dyn ExemplarSampler>,
    clock: Arc<dyn Clock>,
}

impl CounterSeries {
    fn new(sampler: Arc<dyn ExemplarSampler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            value: AtomicF64::new(0.0),
            exemplar: ArcSwapOption::empty(),
            created_millis: clock.now_millis(),
            sampler,
            clock,
        }
    }

    /// Increments the counter by one.
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Increments the counter by `amount`, which must not be negative.
    pub fn inc_by(&self, amount: f64) -> Result<(), ArgumentError> {
        check_increment(amount)?;
        self.value.add(amount);
        Ok(())
    }

    /// Increments the counter and offers the increment to the exemplar sampler.
    ///
    /// The exemplar is swapped in after the value is committed, so a concurrent scrape may see
    /// the new value with the previous exemplar.
    pub fn inc_with_exemplar(&self, amount: f64) -> Result<(), ArgumentError> {
        self.inc_by(amount)?;
        let previous = self.exemplar.load();
        if let Some(exemplar) = self.sampler.sample(amount, previous.as_deref()) {
            self.exemplar.store(Some(Arc::new(exemplar)));
        }
        Ok(())
    }

    /// Increments the counter, attaching an exemplar with the given labels.
    pub fn inc_with_labels_exemplar(
        &self,
        amount: f64,
        exemplar_labels: Labels,
    ) -> Result<(), ArgumentError> {
        check_increment(amount)?;
        let exemplar = Exemplar::new(amount, exemplar_labels, Some(self.clock.now_millis()))?;
        self.value.add(amount);
        self.exemplar.store(Some(Arc::new(exemplar)));
        Ok(())
    }

    /// The current total.
    pub fn get(&self) -> f64 {
        self.value.get()
    }

    /// The most recently sampled exemplar.
    pub fn exemplar(&self) -> Option<Exemplar> {
        self.exemplar.load().as_deref().cloned()
    }

    fn point(&self, labels: Labels) -> CounterPoint {
        CounterPoint {
            labels,
            value: self.get(),
            exemplar: self.exemplar(),
            created_millis: Some(self.created_millis),
            scrape_timestamp_millis: None,
        }
    }
}

fn check_increment(amount: f64) -> Result<(), ArgumentError> {
    if amount < 0.0 || amount.is_nan() {
        return Err(ArgumentError::NegativeIncrement(amount));
    }
    Ok(())
}

impl Counter {
    /// Starts building a counter.
    ///
    /// A trailing `_total` is stripped from `name`; encoders append it again.
    pub fn builder(name: impl Into<String>) -> CounterBuilder {
        CounterBuilder {
            common: CommonBuilder::new(name),
            sampler: Arc::new(NoopExemplarSampler),
        }
    }

    /// Name of the counter, without the `_total` suffix.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Gets the series for the given label values, in the order the label names were declared.
    pub fn with_label_values<V: AsRef<str>>(
        &self,
        values: &[V],
    ) -> Result<Arc<CounterSeries>, LabelError> {
        self.family.get_or_create(values, || self.new_series())
    }

    /// Gets the series for the given `(name, value)` label pairs, in any order.
    pub fn with_labels(
        &self,
        labels: &[(&str, &str)],
    ) -> Result<Arc<CounterSeries>, ArgumentError> {
        let values = self.family.values_by_name(labels)?;
        Ok(self.with_label_values(&values)?)
    }

    /// Removes the series for the given label values.
    pub fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        self.family.remove(values)
    }

    /// Removes all series.
    pub fn clear(&self) {
        self.family.clear();
        if let Some(series) = &self.unlabeled {
            self.family.insert(Labels::empty(), Arc::clone(series));
        }
    }

    /// Increments the series without labels by one.
    pub fn inc(&self) -> Result<(), ArgumentError> {
        self.unlabeled()?.inc();
        Ok(())
    }

    /// Increments the series without labels by `amount`.
    pub fn inc_by(&self, amount: f64) -> Result<(), ArgumentError> {
        self.unlabeled()?.inc_by(amount)
    }

    /// Increments the series without labels and offers the increment to the exemplar sampler.
    pub fn inc_with_exemplar(&self, amount: f64) -> Result<(), ArgumentError> {
        self.unlabeled()?.inc_with_exemplar(amount)
    }

    /// Value of the series without labels.
    pub fn get(&self) -> Result<f64, ArgumentError> {
        Ok(self.unlabeled()?.get())
    }

    fn unlabeled(&self) -> Result<&CounterSeries, LabelError> {
        self.unlabeled.as_deref().ok_or(LabelError::ArityMismatch {
            expected: self.family.label_names().len(),
            actual: 0,
        })
    }

    fn new_series(&self) -> CounterSeries {
        CounterSeries::new(Arc::clone(&self.sampler), Arc::clone(&self.clock))
    }
}

impl Collector for Counter {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, series)| series.point(labels))
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::Counter(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::Counter,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`Counter`].
#[must_use]
pub struct CounterBuilder {
    common: CommonBuilder,
    sampler: Arc<dyn ExemplarSampler>,
}

impl CounterBuilder {
    common_builder_methods!();
    unit_builder_method!();

    /// Sets the sampler consulted by `inc_with_exemplar`.
    pub fn exemplar_sampler(mut self, sampler: Arc<dyn ExemplarSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Builds the counter.
    pub fn build(self) -> Result<Counter, ArgumentError> {
        let common = self.common.build(Some("_total"), &[])?;
        let counter = Counter {
            metadata: common.metadata,
            family: Family::new(common.label_names),
            unlabeled: None,
            sampler: self.sampler,
            clock: common.clock,
        };
        Ok(with_unlabeled_series(counter))
    }
}

fn with_unlabeled_series(mut counter: Counter) -> Counter {
    if counter.family.label_names().is_empty() {
        let series = Arc::new(counter.new_series());
        counter.family.insert(Labels::empty(), Arc::clone(&series));
        counter.unlabeled = Some(series);
    }
    counter
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::clock::MockClock;
    use crate::exemplar::ExemplarSampler;

    struct AlwaysSample;

    impl ExemplarSampler for AlwaysSample {
        fn sample(&self, value: f64, _: Option<&Exemplar>) -> Option<Exemplar> {
            let labels = Labels::of(&["trace_id"], &["abc"]).ok()?;
            Exemplar::new(value, labels, Some(42)).ok()
        }
    }

    fn points(counter: &Counter) -> Vec<CounterPoint> {
        match counter.collect().unwrap().remove(0).into_parts().1 {
            FamilyData::Counter(points) => points,
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn test_total_suffix_is_stripped() {
        let counter = Counter::builder("requests_total").build().unwrap();
        assert_eq!(counter.name(), "requests");
        let counter = Counter::builder("io").unit(crate::Unit::bytes()).build().unwrap();
        assert_eq!(counter.name(), "io_bytes");
    }

    #[test]
    fn test_negative_increment_fails() {
        let counter = Counter::builder("requests").build().unwrap();
        assert_eq!(counter.inc_by(-1.0), Err(ArgumentError::NegativeIncrement(-1.0)));
        assert!(counter.inc_by(f64::NAN).is_err());
        counter.inc_by(2.5).unwrap();
        counter.inc().unwrap();
        assert_eq!(counter.get(), Ok(3.5));
    }

    #[test]
    fn test_unlabeled_series_exists_from_the_start() {
        let clock = MockClock::new(1_000);
        let counter = Counter::builder("requests").clock(Arc::new(clock)).build().unwrap();
        let points = points(&counter);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 0.0);
        assert_eq!(points[0].created_millis, Some(1_000));

        counter.clear();
        assert_eq!(self::points(&counter).len(), 1);
    }

    #[test]
    fn test_labeled_series() {
        let counter =
            Counter::builder("requests").label_names(["method", "status"]).build().unwrap();
        assert!(counter.inc().is_err());
        assert!(points(&counter).is_empty());

        counter.with_label_values(&["GET", "200"]).unwrap().inc_by(2.0).unwrap();
        counter.with_labels(&[("status", "200"), ("method", "GET")]).unwrap().inc();
        counter.with_label_values(&["POST", "500"]).unwrap().inc();

        let points = points(&counter);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].labels.get("method"), Some("GET"));
        assert_eq!(points[0].value, 3.0);
        assert_eq!(points[1].labels.get("method"), Some("POST"));

        assert_eq!(counter.remove(&["POST", "500"]), Ok(true));
        assert_eq!(self::points(&counter).len(), 1);
        counter.clear();
        assert!(self::points(&counter).is_empty());
    }

    #[test]
    fn test_exemplars() {
        let counter =
            Counter::builder("requests").exemplar_sampler(Arc::new(AlwaysSample)).build().unwrap();
        counter.inc_by(1.0).unwrap();
        assert!(points(&counter)[0].exemplar.is_none());

        counter.inc_with_exemplar(2.0).unwrap();
        let exemplar = points(&counter)[0].exemplar.clone().unwrap();
        assert_eq!(exemplar.value(), 2.0);
        assert_eq!(exemplar.timestamp_millis(), Some(42));

        let series = counter.with_label_values::<&str>(&[]).unwrap();
        let labels = Labels::of(&["user"], &["x".repeat(200)]).unwrap();
        assert!(series.inc_with_labels_exemplar(1.0, labels).is_err());
        assert_eq!(series.get(), 3.0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(Counter::builder("requests").build().unwrap());
        let handles = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        counter.inc().unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), Ok(4_000.0));
    }

    #[test]
    fn test_descriptor() {
        let counter = Counter::builder("requests_total").label_names(["path"]).build().unwrap();
        let descriptor = counter.descriptor().unwrap();
        assert_eq!(descriptor.name, "requests");
        assert_eq!(descriptor.metric_type, MetricType::Counter);
        assert_eq!(descriptor.label_names, vec!["path".to_string()]);
    }
}
