use super::{common_builder_methods, CommonBuilder, Family};
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::snapshot::{FamilyData, InfoPoint, Metadata, MetricFamily, MetricType};

/// Exposes static information, such as a build version, as labels on a constant `1` sample.
///
/// The name is stored without an `_info` suffix; encoders append it.
pub struct Info {
    metadata: Metadata,
    family: Family<()>,
}

impl Info {
    /// Starts building an info metric. A trailing `_info` is stripped from `name`.
    pub fn builder(name: impl Into<String>) -> InfoBuilder {
        InfoBuilder { common: CommonBuilder::new(name) }
    }

    /// The metric name, without the `_info` suffix.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Adds a set of label values, keeping the ones added before.
    pub fn add<V: AsRef<str>>(&self, values: &[V]) -> Result<(), LabelError> {
        self.family.get_or_create(values, || ()).map(|_| ())
    }

    /// Replaces all label values with the given ones.
    ///
    /// The swap happens under a single lock, so a concurrent scrape sees either the old values
    /// or the new ones. Invalid values leave the current ones in place.
    pub fn set<V: AsRef<str>>(&self, values: &[V]) -> Result<(), LabelError> {
        self.family.replace(values, ()).map(|_| ())
    }

    /// Removes one set of label values, returning whether it was present.
    pub fn remove<V: AsRef<str>>(&self, values: &[V]) -> Result<bool, LabelError> {
        self.family.remove(values)
    }

    /// Removes every set of label values.
    pub fn clear(&self) {
        self.family.clear();
    }
}

impl Collector for Info {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, _)| InfoPoint { labels, scrape_timestamp_millis: None })
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::Info(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::Info,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`Info`].
#[must_use]
pub struct InfoBuilder {
    common: CommonBuilder,
}

impl InfoBuilder {
    common_builder_methods!();

    /// Builds the metric.
    pub fn build(self) -> Result<Info, ArgumentError> {
        let common = self.common.build(Some("_info"), &[])?;
        Ok(Info { metadata: common.metadata, family: Family::new(common.label_names) })
    }
}
