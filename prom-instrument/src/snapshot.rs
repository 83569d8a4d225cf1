//! Point-in-time snapshots of metric families.
//!
//! Snapshots are produced by [`Collector`](crate::Collector)s during a scrape and consumed by the
//! exposition encoders. They are plain data: building one by hand is how custom collectors
//! expose values that are not backed by the metric types of this crate.
use std::fmt;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::ArgumentError;
use crate::exemplar::Exemplar;
use crate::labels::Labels;
use crate::naming::{sanitize_metric_name, validate_base_metric_name};
use crate::unit::Unit;

/// The type of a metric family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// A monotonically increasing total.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// Observations counted into buckets.
    Histogram,
    /// Observations summarized into quantiles over a sliding window.
    Summary,
    /// Static information exposed as labels.
    Info,
    /// A set of named boolean states.
    StateSet,
    /// A value of unspecified type.
    Unknown,
}

impl MetricType {
    /// The type name used in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Info => "info",
            MetricType::StateSet => "stateset",
            MetricType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, help text and unit of a metric family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    help: Option<String>,
    unit: Option<Unit>,
}

impl Metadata {
    /// Creates metadata for the given base metric name.
    ///
    /// The name must be valid and must not end with one of the
    /// [reserved suffixes](crate::naming::RESERVED_METRIC_NAME_SUFFIXES), since encoders add
    /// `_total`, `_info`, `_bucket` and `_created` themselves.
    pub fn new(name: impl Into<String>) -> Result<Self, ArgumentError> {
        let name = name.into();
        validate_base_metric_name(&name)?;
        Ok(Self { name, help: None, unit: None })
    }

    /// Creates metadata for a name coming from outside, such as another metrics library,
    /// after passing it through [`sanitize_metric_name`].
    ///
    /// Fails only if nothing valid is left of the name.
    pub fn sanitized(name: &str) -> Result<Self, ArgumentError> {
        Self::new(sanitize_metric_name(name))
    }

    /// Sets the help text. An empty string clears it.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        let help = help.into();
        self.help = if help.is_empty() { None } else { Some(help) };
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// The base name, without any suffix added by encoders.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The help text, if any.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// The unit, if any.
    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }
}

/// One series of a counter family.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterPoint {
    /// Labels identifying the series.
    pub labels: Labels,
    /// Current total.
    pub value: f64,
    /// Most recent sampled exemplar.
    pub exemplar: Option<Exemplar>,
    /// When the series was created, in milliseconds since the Unix epoch.
    pub created_millis: Option<i64>,
    /// Timestamp to write on the sample, in milliseconds since the Unix epoch.
    pub scrape_timestamp_millis: Option<i64>,
}

/// One series of a gauge family.
#[derive(Clone, Debug, PartialEq)]
pub struct GaugePoint {
    /// Labels identifying the series.
    pub labels: Labels,
    /// Current value.
    pub value: f64,
    /// Timestamp to write on the sample, in milliseconds since the Unix epoch.
    pub scrape_timestamp_millis: Option<i64>,
}

/// One histogram bucket. `count` is the number of observations in this bucket only, encoders
/// compute cumulative counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bucket {
    /// Inclusive upper bound.
    pub upper_bound: f64,
    /// Observations in this bucket.
    pub count: u64,
}

/// One series of a histogram family.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramPoint {
    /// Labels identifying the series.
    pub labels: Labels,
    /// Buckets in increasing order of upper bound. The last bucket is `+Inf`.
    pub buckets: Vec<Bucket>,
    /// Sum of all observations.
    pub sum: f64,
    /// At most one exemplar per bucket.
    pub exemplars: Vec<Exemplar>,
    /// When the series was created, in milliseconds since the Unix epoch.
    pub created_millis: Option<i64>,
    /// Timestamp to write on the samples.
    pub scrape_timestamp_millis: Option<i64>,
}

impl HistogramPoint {
    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// The exemplar whose value falls into `(lower, upper]`, if any.
    pub fn exemplar_in(&self, lower: f64, upper: f64) -> Option<&Exemplar> {
        self.exemplars.iter().find(|e| e.value() > lower && e.value() <= upper)
    }
}

/// An estimated quantile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantileValue {
    /// The quantile, in `[0, 1]`.
    pub quantile: f64,
    /// Estimated value, or NaN if the window is empty.
    pub value: f64,
}

/// One series of a summary family.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryPoint {
    /// Labels identifying the series.
    pub labels: Labels,
    /// Total number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Quantiles over the current window, in the order they were configured.
    pub quantiles: Vec<QuantileValue>,
    /// Most recent exemplar, if any.
    pub exemplars: Vec<Exemplar>,
    /// When the series was created, in milliseconds since the Unix epoch.
    pub created_millis: Option<i64>,
    /// Timestamp to write on the samples.
    pub scrape_timestamp_millis: Option<i64>,
}

/// One set of info labels.
#[derive(Clone, Debug, PartialEq)]
pub struct InfoPoint {
    /// The info labels.
    pub labels: Labels,
    /// Timestamp to write on the sample.
    pub scrape_timestamp_millis: Option<i64>,
}

/// One state of a state set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    /// State name, written as the value of the label named after the family.
    pub name: String,
    /// Whether the state is currently set.
    pub enabled: bool,
}

/// One series of a state set family.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSetPoint {
    /// Labels identifying the series, without the state label.
    pub labels: Labels,
    /// All states, in the order they were declared.
    pub states: Vec<State>,
    /// Timestamp to write on the samples.
    pub scrape_timestamp_millis: Option<i64>,
}

/// One series of a family with no declared type.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownPoint {
    /// Labels identifying the series.
    pub labels: Labels,
    /// Current value.
    pub value: f64,
    /// Most recent exemplar, if any.
    pub exemplar: Option<Exemplar>,
    /// Timestamp to write on the sample.
    pub scrape_timestamp_millis: Option<i64>,
}

/// The data points of a family, typed by metric type.
#[derive(Clone, Debug, PartialEq)]
pub enum FamilyData {
    /// Counter points.
    Counter(Vec<CounterPoint>),
    /// Gauge points.
    Gauge(Vec<GaugePoint>),
    /// Histogram points.
    Histogram(Vec<HistogramPoint>),
    /// Summary points.
    Summary(Vec<SummaryPoint>),
    /// Info points.
    Info(Vec<InfoPoint>),
    /// State set points.
    StateSet(Vec<StateSetPoint>),
    /// Points of unknown type.
    Unknown(Vec<UnknownPoint>),
}

impl FamilyData {
    /// The metric type these points belong to.
    pub fn metric_type(&self) -> MetricType {
        match self {
            FamilyData::Counter(_) => MetricType::Counter,
            FamilyData::Gauge(_) => MetricType::Gauge,
            FamilyData::Histogram(_) => MetricType::Histogram,
            FamilyData::Summary(_) => MetricType::Summary,
            FamilyData::Info(_) => MetricType::Info,
            FamilyData::StateSet(_) => MetricType::StateSet,
            FamilyData::Unknown(_) => MetricType::Unknown,
        }
    }

    /// Number of data points.
    pub fn len(&self) -> usize {
        match self {
            FamilyData::Counter(points) => points.len(),
            FamilyData::Gauge(points) => points.len(),
            FamilyData::Histogram(points) => points.len(),
            FamilyData::Summary(points) => points.len(),
            FamilyData::Info(points) => points.len(),
            FamilyData::StateSet(points) => points.len(),
            FamilyData::Unknown(points) => points.len(),
        }
    }

    /// Whether there are no data points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends the points of `other`, skipping points whose labels are already present.
    ///
    /// Returns `other` unchanged if the types differ.
    fn absorb(&mut self, other: FamilyData) -> Result<usize, FamilyData> {
        fn extend<P>(into: &mut Vec<P>, from: Vec<P>, labels: impl Fn(&P) -> &Labels) -> usize {
            let mut dropped = 0;
            for point in from {
                if into.iter().any(|existing| labels(existing) == labels(&point)) {
                    dropped += 1;
                } else {
                    into.push(point);
                }
            }
            dropped
        }

        match (self, other) {
            (FamilyData::Counter(a), FamilyData::Counter(b)) => Ok(extend(a, b, |p| &p.labels)),
            (FamilyData::Gauge(a), FamilyData::Gauge(b)) => Ok(extend(a, b, |p| &p.labels)),
            (FamilyData::Histogram(a), FamilyData::Histogram(b)) => {
                Ok(extend(a, b, |p| &p.labels))
            }
            (FamilyData::Summary(a), FamilyData::Summary(b)) => Ok(extend(a, b, |p| &p.labels)),
            (FamilyData::Info(a), FamilyData::Info(b)) => Ok(extend(a, b, |p| &p.labels)),
            (FamilyData::StateSet(a), FamilyData::StateSet(b)) => {
                Ok(extend(a, b, |p| &p.labels))
            }
            (FamilyData::Unknown(a), FamilyData::Unknown(b)) => Ok(extend(a, b, |p| &p.labels)),
            (_, other) => Err(other),
        }
    }
}

/// A snapshot of one metric family.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricFamily {
    metadata: Metadata,
    data: FamilyData,
}

impl MetricFamily {
    /// Creates a family from its metadata and points.
    pub fn new(metadata: Metadata, data: FamilyData) -> Self {
        Self { metadata, data }
    }

    /// Name, help text and unit.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The family name, without type suffixes.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// The metric type of [`MetricFamily::data`].
    pub fn metric_type(&self) -> MetricType {
        self.data.metric_type()
    }

    /// The data points.
    pub fn data(&self) -> &FamilyData {
        &self.data
    }

    /// Splits the family into its metadata and points.
    pub fn into_parts(self) -> (Metadata, FamilyData) {
        (self.metadata, self.data)
    }
}

/// Two families with the same name but different types were collected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeConflict {
    /// Family name.
    pub name: String,
    /// Type of the family that was kept.
    pub kept: MetricType,
    /// Type of the family that was dropped.
    pub dropped: MetricType,
}

/// An ordered set of metric family snapshots with unique names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricSnapshots {
    families: Vec<MetricFamily>,
}

impl MetricSnapshots {
    /// Builds a snapshot set, merging families that share a name.
    ///
    /// Families whose type conflicts with an earlier family of the same name are dropped.
    pub fn new(families: Vec<MetricFamily>) -> Self {
        Self::merge(families).0
    }

    /// Like [`MetricSnapshots::new`], also returning the families dropped for a type conflict.
    ///
    /// Families are sorted by name. Within a merged family, the first point seen for a given
    /// label set wins.
    pub fn merge(families: Vec<MetricFamily>) -> (Self, Vec<TypeConflict>) {
        let mut by_name: IndexMap<String, MetricFamily> = IndexMap::new();
        let mut conflicts = Vec::new();

        for family in families {
            match by_name.get_mut(family.name()) {
                None => {
                    by_name.insert(family.name().to_string(), family);
                }
                Some(existing) => {
                    let (metadata, data) = family.into_parts();
                    match existing.data.absorb(data) {
                        Ok(0) => {}
                        Ok(dropped) => {
                            debug!(name = metadata.name(), dropped, "dropped duplicate samples");
                        }
                        Err(data) => conflicts.push(TypeConflict {
                            name: metadata.name().to_string(),
                            kept: existing.metric_type(),
                            dropped: data.metric_type(),
                        }),
                    }
                    if existing.metadata.help.is_none() {
                        existing.metadata.help = metadata.help;
                    }
                }
            }
        }
        by_name.sort_keys();

        (Self { families: by_name.into_values().collect() }, conflicts)
    }

    /// Number of families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Whether there are no families.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Looks up a family by name.
    pub fn get(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name() == name)
    }

    /// Iterates over the families in name order.
    pub fn iter(&self) -> std::slice::Iter<'_, MetricFamily> {
        self.families.iter()
    }
}

impl<'a> IntoIterator for &'a MetricSnapshots {
    type Item = &'a MetricFamily;
    type IntoIter = std::slice::Iter<'a, MetricFamily>;

    fn into_iter(self) -> Self::IntoIter {
        self.families.iter()
    }
}

impl IntoIterator for MetricSnapshots {
    type Item = MetricFamily;
    type IntoIter = std::vec::IntoIter<MetricFamily>;

    fn into_iter(self) -> Self::IntoIter {
        self.families.into_iter()
    }
}
