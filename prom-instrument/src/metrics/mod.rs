//! Metric types.
//!
//! Every metric is a family of series, one per distinct set of label values. Series are created
//! lazily on first use and handed out as `Arc`s, so hot paths can resolve a series once and keep
//! the handle around instead of looking it up on every update.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::error::{ArgumentError, LabelError};
use crate::labels::Labels;
use crate::naming::{add_unit_if_missing, strip_suffix, validate_label_names, validate_metric_name};
use crate::snapshot::Metadata;
use crate::unit::Unit;

mod counter;
pub use self::counter::{Counter, CounterBuilder, CounterSeries};

mod gauge;
pub use self::gauge::{Gauge, GaugeBuilder, GaugeSeries};

mod histogram;
pub use self::histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramBuilder, HistogramSeries,
    DEFAULT_BUCKETS,
};

mod info;
pub use self::info::{Info, InfoBuilder};

mod state_set;
pub use self::state_set::{StateSet, StateSetBuilder, StateSetSeries};

mod summary;
pub use self::summary::{Summary, SummaryBuilder, SummarySeries};

mod timer;
pub use self::timer::Timer;

/// Series of one metric, keyed by label set.
pub(crate) struct Family<S> {
    label_names: Vec<String>,
    series: RwLock<HashMap<Labels, Arc<S>>>,
}

impl<S> Family<S> {
    pub(crate) fn new(label_names: Vec<String>) -> Self {
        Self { label_names, series: RwLock::new(HashMap::new()) }
    }

    pub(crate) fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Gets the series for the given label values, creating it if it does not exist yet.
    pub(crate) fn get_or_create<V: AsRef<str>>(
        &self,
        values: &[V],
        create: impl FnOnce() -> S,
    ) -> Result<Arc<S>, LabelError> {
        let labels = Labels::of(&self.label_names, values)?;
        if let Some(series) = self.series.read().get(&labels) {
            return Ok(Arc::clone(series));
        }

        let mut series = self.series.write();
        Ok(Arc::clone(series.entry(labels).or_insert_with(|| Arc::new(create()))))
    }

    /// Orders `(name, value)` pairs by the declared label names.
    pub(crate) fn values_by_name<'a>(
        &self,
        pairs: &[(&'a str, &'a str)],
    ) -> Result<Vec<&'a str>, ArgumentError> {
        if pairs.len() != self.label_names.len() {
            return Err(LabelError::ArityMismatch {
                expected: self.label_names.len(),
                actual: pairs.len(),
            }
            .into());
        }
        self.label_names
            .iter()
            .map(|name| {
                pairs
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| ArgumentError::MissingLabelValue(name.clone()))
            })
            .collect()
    }

    /// Removes the series for the given label values, returning whether it existed.
    pub(crate) fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        let labels = Labels::of(&self.label_names, values)?;
        Ok(self.series.write().remove(&labels).is_some())
    }

    /// Removes every series.
    pub(crate) fn clear(&self) {
        self.series.write().clear();
    }

    /// Replaces every series with a single one for the given label values.
    ///
    /// Readers see either the old series or the new one, never an empty family.
    pub(crate) fn replace<V: AsRef<str>>(
        &self,
        values: &[V],
        series: S,
    ) -> Result<Arc<S>, LabelError> {
        let labels = Labels::of(&self.label_names, values)?;
        let series = Arc::new(series);
        let mut map = self.series.write();
        map.clear();
        map.insert(labels, Arc::clone(&series));
        Ok(series)
    }

    pub(crate) fn insert(&self, labels: Labels, series: Arc<S>) {
        self.series.write().insert(labels, series);
    }

    /// All series, sorted by label set.
    ///
    /// The series lock is only held while the handles are copied out, so writers are never
    /// blocked for the duration of a snapshot.
    pub(crate) fn snapshot(&self) -> Vec<(Labels, Arc<S>)> {
        let mut series = self
            .series
            .read()
            .iter()
            .map(|(labels, series)| (labels.clone(), Arc::clone(series)))
            .collect::<Vec<_>>();
        series.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        series
    }
}

/// Builder state shared by every metric type.
pub(crate) struct CommonBuilder {
    name: String,
    help: Option<String>,
    unit: Option<Unit>,
    label_names: Vec<String>,
    clock: Arc<dyn Clock>,
}

/// Validated metric configuration.
pub(crate) struct Common {
    pub(crate) metadata: Metadata,
    pub(crate) label_names: Vec<String>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl CommonBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: None,
            unit: None,
            label_names: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Validates the configuration.
    ///
    /// `suffix` is stripped from the name if present, and `reserved` lists label names the
    /// metric type uses itself.
    pub(crate) fn build(
        self,
        suffix: Option<&str>,
        reserved: &[&str],
    ) -> Result<Common, ArgumentError> {
        validate_metric_name(&self.name)?;
        let mut name = match suffix {
            Some(suffix) => strip_suffix(&self.name, suffix).to_string(),
            None => self.name,
        };
        if let Some(unit) = &self.unit {
            name = add_unit_if_missing(&name, unit.as_str());
        }

        validate_label_names(&self.label_names)?;
        if let Some(name) = self.label_names.iter().find(|n| reserved.contains(&n.as_str())) {
            return Err(LabelError::ReservedName(name.clone()).into());
        }

        let mut metadata = Metadata::new(name)?;
        if let Some(help) = self.help {
            metadata = metadata.with_help(help);
        }
        if let Some(unit) = self.unit {
            metadata = metadata.with_unit(unit);
        }

        Ok(Common { metadata, label_names: self.label_names, clock: self.clock })
    }
}

/// Builder methods shared by every metric type.
macro_rules! common_builder_methods {
    () => {
        /// Sets the help text.
        pub fn help(mut self, help: impl Into<String>) -> Self {
            self.common.help = Some(help.into());
            self
        }

        /// Declares the label names of the metric. Every series must provide a value for each.
        pub fn label_names<I, S>(mut self, names: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.common.label_names = names.into_iter().map(Into::into).collect();
            self
        }

        /// Sets the clock used for created timestamps.
        pub fn clock(mut self, clock: ::std::sync::Arc<dyn $crate::clock::Clock>) -> Self {
            self.common.clock = clock;
            self
        }
    };
}

/// Builder method for metric types that carry a unit.
macro_rules! unit_builder_method {
    () => {
        /// Sets the unit. It is appended to the metric name if the name does not end with it.
        pub fn unit(mut self, unit: $crate::unit::Unit) -> Self {
            self.common.unit = Some(unit);
            self
        }
    };
}

pub(crate) use common_builder_methods;
pub(crate) use unit_builder_method;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_reuses_series() {
        let family = Family::<u32>::new(vec!["method".into(), "status".into()]);
        let a = family.get_or_create(&["GET", "200"], || 1).unwrap();
        let b = family.get_or_create(&["GET", "200"], || 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, 1);

        assert_eq!(
            family.get_or_create(&["GET"], || 3).unwrap_err(),
            LabelError::ArityMismatch { expected: 2, actual: 1 }
        );
    }

    #[test]
    fn test_family_values_by_name() {
        let family = Family::<u32>::new(vec!["method".into(), "status".into()]);
        assert_eq!(
            family.values_by_name(&[("status", "200"), ("method", "GET")]).unwrap(),
            vec!["GET", "200"]
        );
        assert_eq!(
            family.values_by_name(&[("status", "200"), ("path", "/")]).unwrap_err(),
            ArgumentError::MissingLabelValue("method".into())
        );
        assert!(family.values_by_name(&[("status", "200")]).is_err());
    }

    #[test]
    fn test_family_remove_and_snapshot_order() {
        let family = Family::<u32>::new(vec!["path".into()]);
        family.get_or_create(&["/b"], || 2).unwrap();
        family.get_or_create(&["/a"], || 1).unwrap();
        family.get_or_create(&["/c"], || 3).unwrap();

        assert_eq!(family.remove(&["/c"]), Ok(true));
        assert_eq!(family.remove(&["/c"]), Ok(false));

        let values = family.snapshot().into_iter().map(|(_, s)| *s).collect::<Vec<_>>();
        assert_eq!(values, vec![1, 2]);

        family.clear();
        assert!(family.snapshot().is_empty());
    }

    #[test]
    fn test_family_replace() {
        let family = Family::<u32>::new(vec!["a".to_string()]);
        family.get_or_create(&["x"], || 1).unwrap();
        family.get_or_create(&["y"], || 2).unwrap();

        assert!(family.replace(&["x", "extra"], 9).is_err());
        assert_eq!(family.snapshot().len(), 2);

        let replaced = family.replace(&["z"], 3).unwrap();
        assert_eq!(*replaced, 3);
        let snapshot = family.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.get("a"), Some("z"));
    }

    #[test]
    fn test_common_builder() {
        let mut builder = CommonBuilder::new("request_duration");
        builder.unit = Some(Unit::seconds());
        builder.label_names = vec!["le".into()];
        assert_eq!(
            builder.build(None, &["le"]).err(),
            Some(ArgumentError::Label(LabelError::ReservedName("le".into())))
        );

        let mut builder = CommonBuilder::new("requests_total");
        builder.help = Some("Total requests.".into());
        let common = builder.build(Some("_total"), &[]).unwrap();
        assert_eq!(common.metadata.name(), "requests");
        assert_eq!(common.metadata.help(), Some("Total requests."));

        let mut builder = CommonBuilder::new("request_duration");
        builder.unit = Some(Unit::seconds());
        assert_eq!(builder.build(None, &[]).unwrap().metadata.name(), "request_duration_seconds");

        assert!(CommonBuilder::new("0bad").build(None, &[]).is_err());
    }
}
