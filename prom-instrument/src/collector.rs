use crate::error::CollectorError;
use crate::snapshot::{MetricFamily, MetricType};

/// Name, type and label names of the family a collector produces.
///
/// Registries use descriptors to reject conflicting registrations up front and to unregister
/// collectors by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Family name, without type suffixes.
    pub name: String,
    /// Family type.
    pub metric_type: MetricType,
    /// Declared label names.
    pub label_names: Vec<String>,
}

impl Descriptor {
    /// Whether `label_names` is the same set as this descriptor's label names, ignoring order.
    pub fn has_label_names<S: AsRef<str>>(&self, label_names: &[S]) -> bool {
        let mut ours = self.label_names.iter().map(String::as_str).collect::<Vec<_>>();
        let mut theirs = label_names.iter().map(AsRef::as_ref).collect::<Vec<_>>();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }
}

/// A source of metric family snapshots.
///
/// Every metric type in this crate is a collector. Custom collectors bridge values that live
/// elsewhere, such as process statistics or the state of a connection pool, and are called once
/// per scrape.
pub trait Collector: Send + Sync + 'static {
    /// Takes a snapshot of the current values.
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError>;

    /// Describes the single family this collector produces, if it is known ahead of time.
    fn descriptor(&self) -> Option<Descriptor> {
        None
    }
}

impl<F> Collector for F
where
    F: Fn() -> Result<Vec<MetricFamily>, CollectorError> + Send + Sync + 'static,
{
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        self()
    }
}
