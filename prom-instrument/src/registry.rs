//! The collector registry.
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::collector::{Collector, Descriptor};
use crate::error::{CollectorError, RegistrationError};
use crate::snapshot::{MetricFamily, MetricSnapshots};

struct Entry {
    // Address of the collector, used as its identity.
    key: usize,
    collector: Arc<dyn Collector>,
    descriptor: Option<Descriptor>,
}

impl Entry {
    fn display_name(&self) -> String {
        match &self.descriptor {
            Some(descriptor) => descriptor.name.clone(),
            None => format!("collector@{:#x}", self.key),
        }
    }
}

fn key_of<C: Collector + ?Sized>(collector: &Arc<C>) -> usize {
    Arc::as_ptr(collector).cast::<()>() as usize
}

/// The outcome of a scrape.
#[derive(Debug, Default)]
pub struct Scrape {
    snapshots: MetricSnapshots,
    failures: Vec<CollectorError>,
}

impl Scrape {
    /// Snapshots of every collector that succeeded.
    pub fn snapshots(&self) -> &MetricSnapshots {
        &self.snapshots
    }

    /// Failures raised by individual collectors.
    pub fn failures(&self) -> &[CollectorError] {
        &self.failures
    }

    /// Whether at least one collector failed, in which case the snapshots are incomplete.
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Splits the scrape into its snapshots and the partial failure flag.
    pub fn into_parts(self) -> (MetricSnapshots, bool) {
        let partial = self.is_partial_failure();
        (self.snapshots, partial)
    }
}

/// A set of registered collectors.
///
/// Registration takes an exclusive lock. Scrapes only hold the shared lock long enough to copy
/// the list of collectors, then call each collector without holding any registry lock.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<Vec<Entry>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector.
    ///
    /// Collectors that describe themselves are checked against the collectors already
    /// registered: the same name may be registered again with a different set of label names,
    /// and the families are merged at scrape time, but not with a different metric type or the
    /// same label names.
    pub fn register(&self, collector: Arc<dyn Collector>) -> Result<(), RegistrationError> {
        let key = key_of(&collector);
        let descriptor = collector.descriptor();
        let mut entries = self.entries.write();

        if let Some(existing) = entries.iter().find(|e| e.key == key) {
            return Err(RegistrationError::Duplicate(existing.display_name()));
        }
        if let Some(descriptor) = &descriptor {
            let same_name = entries
                .iter()
                .filter_map(|e| e.descriptor.as_ref())
                .filter(|existing| existing.name == descriptor.name);
            for existing in same_name {
                if existing.metric_type != descriptor.metric_type {
                    return Err(RegistrationError::ConflictingType {
                        name: descriptor.name.clone(),
                        existing: existing.metric_type.as_str(),
                        requested: descriptor.metric_type.as_str(),
                    });
                }
                if existing.has_label_names(&descriptor.label_names) {
                    return Err(RegistrationError::DuplicateLabelSchema {
                        name: descriptor.name.clone(),
                        label_names: descriptor.label_names.clone(),
                    });
                }
            }
        }

        entries.push(Entry { key, collector, descriptor });
        Ok(())
    }

    /// Unregisters a collector. Does nothing if it is not registered.
    pub fn unregister<C: Collector + ?Sized>(&self, collector: &Arc<C>) {
        let key = key_of(collector);
        self.entries.write().retain(|e| e.key != key);
    }

    /// Unregisters every collector that describes itself with the given name.
    pub fn unregister_name(&self, name: &str) {
        self.entries
            .write()
            .retain(|e| e.descriptor.as_ref().map_or(true, |d| d.name != name));
    }

    /// Unregisters the collector with the given name and set of label names.
    pub fn unregister_name_with_labels<S: AsRef<str>>(&self, name: &str, label_names: &[S]) {
        self.entries.write().retain(|e| {
            e.descriptor
                .as_ref()
                .map_or(true, |d| d.name != name || !d.has_label_names(label_names))
        });
    }

    /// Unregisters every collector.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no collectors are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Collects every registered collector.
    pub fn collect(&self) -> Scrape {
        self.collect_filtered(|_| true)
    }

    /// Collects the families whose name matches `include`.
    ///
    /// Collectors that describe themselves are skipped entirely when their name does not
    /// match. A collector that fails or panics is reported in [`Scrape::failures`] and does not
    /// affect the others.
    pub fn collect_filtered(&self, include: impl Fn(&str) -> bool) -> Scrape {
        let collectors = self
            .entries
            .read()
            .iter()
            .filter(|e| e.descriptor.as_ref().map_or(true, |d| include(&d.name)))
            .map(|e| (Arc::clone(&e.collector), e.display_name()))
            .collect::<Vec<_>>();

        let mut families: Vec<MetricFamily> = Vec::new();
        let mut failures = Vec::new();
        for (collector, name) in collectors {
            match catch_unwind(AssertUnwindSafe(|| collector.collect())) {
                Ok(Ok(collected)) => {
                    families.extend(collected.into_iter().filter(|f| include(f.name())))
                }
                Ok(Err(error)) => {
                    warn!(collector = %name, %error, "collector failed");
                    failures.push(error);
                }
                Err(panic) => {
                    let error = CollectorError::new(name, panic_message(&*panic));
                    warn!(collector = error.collector(), %error, "collector panicked");
                    failures.push(error);
                }
            }
        }

        let (snapshots, conflicts) = MetricSnapshots::merge(families);
        for conflict in conflicts {
            let error = CollectorError::new(
                conflict.name.clone(),
                format!(
                    "collected as a {} after it was already collected as a {}",
                    conflict.dropped, conflict.kept
                ),
            );
            warn!(metric = %conflict.name, %error, "dropped conflicting metric family");
            failures.push(error);
        }

        Scrape { snapshots, failures }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "collector panicked".to_string()
    }
}
