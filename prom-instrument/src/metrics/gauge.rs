use std::sync::Arc;

use super::timer::{Observe, Timer};
use super::{common_builder_methods, unit_builder_method, CommonBuilder, Family};
use crate::atomics::AtomicF64;
use crate::clock::Clock;
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::labels::Labels;
use crate::snapshot::{FamilyData, GaugePoint, Metadata, MetricFamily, MetricType};

/// A value that can go up and down.
pub struct Gauge {
    metadata: Metadata,
    family: Family<GaugeSeries>,
    unlabeled: Option<Arc<GaugeSeries>>,
    clock: Arc<dyn Clock>,
}

/// One series of a [`Gauge`].
pub struct GaugeSeries {
    value: AtomicF64,
    clock: Arc<dyn Clock>,
}

impl GaugeSeries {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self { value: AtomicF64::default(), clock }
    }

    /// Sets the value.
    pub fn set(&self, value: f64) {
        self.value.set(value);
    }

    /// Sets the value to the current time, in seconds since the Unix epoch.
    pub fn set_to_current_time(&self) {
        self.value.set(self.clock.now_millis() as f64 / 1000.0);
    }

    /// Starts a timer that sets the value to the elapsed seconds when dropped.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer::start(self)
    }

    /// Adds one.
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Adds `amount`, which may be negative.
    pub fn inc_by(&self, amount: f64) {
        self.value.add(amount);
    }

    /// Subtracts one.
    pub fn dec(&self) {
        self.value.add(-1.0);
    }

    /// Subtracts `amount`.
    pub fn dec_by(&self, amount: f64) {
        self.value.add(-amount);
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

impl Observe for GaugeSeries {
    fn observe_seconds(&self, seconds: f64) {
        self.set(seconds);
    }
}

impl Gauge {
    /// Starts building a gauge.
    pub fn builder(name: impl Into<String>) -> GaugeBuilder {
        GaugeBuilder { common: CommonBuilder::new(name) }
    }

    /// The metric name, including the unit suffix.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Gets the series for the given label values, in the order the label names were declared.
    pub fn with_label_values<V: AsRef<str>>(
        &self,
        values: &[V],
    ) -> Result<Arc<GaugeSeries>, LabelError> {
        self.family.get_or_create(values, || GaugeSeries::new(Arc::clone(&self.clock)))
    }

    /// Gets the series for the given `(name, value)` label pairs, in any order.
    pub fn with_labels(
        &self,
        labels: &[(&str, &str)],
    ) -> Result<Arc<GaugeSeries>, ArgumentError> {
        let values = self.family.values_by_name(labels)?;
        Ok(self.with_label_values(&values)?)
    }

    /// Removes the series for the given label values, returning whether it existed.
    pub fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        self.family.remove(values)
    }

    /// Removes every labeled series. An unlabeled gauge keeps its single series.
    pub fn clear(&self) {
        self.family.clear();
        if let Some(series) = &self.unlabeled {
            self.family.insert(Labels::empty(), Arc::clone(series));
        }
    }

    /// Sets the series without labels.
    pub fn set(&self, value: f64) -> Result<(), LabelError> {
        self.unlabeled().map(|s| s.set(value))
    }

    /// Sets the series without labels to the current time, in seconds since the Unix epoch.
    pub fn set_to_current_time(&self) -> Result<(), LabelError> {
        self.unlabeled().map(GaugeSeries::set_to_current_time)
    }

    /// Starts a timer on the series without labels.
    pub fn start_timer(&self) -> Result<Timer<'_>, LabelError> {
        self.unlabeled().map(GaugeSeries::start_timer)
    }

    /// Increments the series without labels.
    pub fn inc(&self) -> Result<(), LabelError> {
        self.unlabeled().map(GaugeSeries::inc)
    }

    /// Adds `amount` to the series without labels.
    pub fn inc_by(&self, amount: f64) -> Result<(), LabelError> {
        self.unlabeled().map(|s| s.inc_by(amount))
    }

    /// Decrements the series without labels.
    pub fn dec(&self) -> Result<(), LabelError> {
        self.unlabeled().map(GaugeSeries::dec)
    }

    /// Subtracts `amount` from the series without labels.
    pub fn dec_by(&self, amount: f64) -> Result<(), LabelError> {
        self.unlabeled().map(|s| s.dec_by(amount))
    }

    /// Reads the series without labels.
    pub fn get(&self) -> Result<f64, LabelError> {
        self.unlabeled().map(GaugeSeries::get)
    }

    fn unlabeled(&self) -> Result<&GaugeSeries, LabelError> {
        self.unlabeled.as_deref().ok_or(LabelError::ArityMismatch {
            expected: self.family.label_names().len(),
            actual: 0,
        })
    }
}

impl Collector for Gauge {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, series)| GaugePoint {
                labels,
                value: series.get(),
                scrape_timestamp_millis: None,
            })
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::Gauge(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::Gauge,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`Gauge`].
#[must_use]
pub struct GaugeBuilder {
    common: CommonBuilder,
}

impl GaugeBuilder {
    common_builder_methods!();
    unit_builder_method!();

    /// Builds the gauge.
    pub fn build(self) -> Result<Gauge, ArgumentError> {
        let common = self.common.build(None, &[])?;
        let family = Family::new(common.label_names);
        let unlabeled = if family.label_names().is_empty() {
            let series = Arc::new(GaugeSeries::new(Arc::clone(&common.clock)));
            family.insert(Labels::empty(), Arc::clone(&series));
            Some(series)
        } else {
            None
        };
        Ok(Gauge { metadata: common.metadata, family, unlabeled, clock: common.clock })
    }
}
