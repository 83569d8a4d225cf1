use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{common_builder_methods, CommonBuilder, Family};
use crate::collector::{Collector, Descriptor};
use crate::error::{ArgumentError, CollectorError, LabelError};
use crate::labels::Labels;
use crate::snapshot::{FamilyData, Metadata, MetricFamily, MetricType, State, StateSetPoint};

/// A fixed set of named boolean states.
///
/// Each state is exposed as its own sample, with a label named after the metric holding the
/// state name.
pub struct StateSet {
    metadata: Metadata,
    family: Family<StateSetSeries>,
    unlabeled: Option<Arc<StateSetSeries>>,
    states: Arc<[String]>,
}

/// One series of a [`StateSet`].
pub struct StateSetSeries {
    states: Arc<[String]>,
    enabled: Box<[AtomicBool]>,
}

impl StateSetSeries {
    fn new(states: Arc<[String]>) -> Self {
        let enabled = states.iter().map(|_| AtomicBool::new(false)).collect();
        Self { states, enabled }
    }

    /// Sets or clears a state.
    pub fn set(&self, state: &str, enabled: bool) -> Result<(), ArgumentError> {
        self.enabled[self.index_of(state)?].store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Sets a state.
    pub fn set_true(&self, state: &str) -> Result<(), ArgumentError> {
        self.set(state, true)
    }

    /// Clears a state.
    pub fn set_false(&self, state: &str) -> Result<(), ArgumentError> {
        self.set(state, false)
    }

    /// Whether a state is set.
    pub fn is_enabled(&self, state: &str) -> Result<bool, ArgumentError> {
        Ok(self.enabled[self.index_of(state)?].load(Ordering::Relaxed))
    }

    fn index_of(&self, state: &str) -> Result<usize, ArgumentError> {
        self.states
            .iter()
            .position(|s| s == state)
            .ok_or_else(|| ArgumentError::UnknownState(state.to_string()))
    }

    fn point(&self, labels: Labels) -> StateSetPoint {
        let states = self
            .states
            .iter()
            .zip(self.enabled.iter())
            .map(|(name, enabled)| State {
                name: name.clone(),
                enabled: enabled.load(Ordering::Relaxed),
            })
            .collect();
        StateSetPoint { labels, states, scrape_timestamp_millis: None }
    }
}

impl StateSet {
    /// Starts building a state set.
    pub fn builder(name: impl Into<String>) -> StateSetBuilder {
        StateSetBuilder { common: CommonBuilder::new(name), states: Vec::new() }
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    /// Declared states, in order.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Gets the series for the given label values, in the order the label names were declared.
    pub fn with_label_values<V: AsRef<str>>(
        &self,
        values: &[V],
    ) -> Result<Arc<StateSetSeries>, LabelError> {
        self.family.get_or_create(values, || StateSetSeries::new(Arc::clone(&self.states)))
    }

    /// Gets the series for the given `(name, value)` label pairs, in any order.
    pub fn with_labels(
        &self,
        labels: &[(&str, &str)],
    ) -> Result<Arc<StateSetSeries>, ArgumentError> {
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

    /// Sets a state on the series without labels.
    pub fn set(&self, state: &str, enabled: bool) -> Result<(), ArgumentError> {
        self.unlabeled()?.set(state, enabled)
    }

    /// Sets a state on the series without labels.
    pub fn set_true(&self, state: &str) -> Result<(), ArgumentError> {
        self.set(state, true)
    }

    /// Clears a state on the series without labels.
    pub fn set_false(&self, state: &str) -> Result<(), ArgumentError> {
        self.set(state, false)
    }

    fn unlabeled(&self) -> Result<&StateSetSeries, LabelError> {
        self.unlabeled.as_deref().ok_or(LabelError::ArityMismatch {
            expected: self.family.label_names().len(),
            actual: 0,
        })
    }
}

impl Collector for StateSet {
    fn collect(&self) -> Result<Vec<MetricFamily>, CollectorError> {
        let points = self
            .family
            .snapshot()
            .into_iter()
            .map(|(labels, series)| series.point(labels))
            .collect();
        Ok(vec![MetricFamily::new(self.metadata.clone(), FamilyData::StateSet(points))])
    }

    fn descriptor(&self) -> Option<Descriptor> {
        Some(Descriptor {
            name: self.metadata.name().to_string(),
            metric_type: MetricType::StateSet,
            label_names: self.family.label_names().to_vec(),
        })
    }
}

/// Builder for [`StateSet`].
#[must_use]
pub struct StateSetBuilder {
    common: CommonBuilder,
    states: Vec<String>,
}

impl StateSetBuilder {
    common_builder_methods!();

    /// Declares the possible states.
    pub fn states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states = states.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the state set.
    ///
    /// Fails if no states were declared or a state is declared twice.
    pub fn build(self) -> Result<StateSet, ArgumentError> {
        if self.states.is_empty() {
            return Err(ArgumentError::InvalidStates("at least one state is required".into()));
        }
        let duplicate = self.states.iter().enumerate().find(|&(i, s)| self.states[..i].contains(s));
        if let Some((_, duplicate)) = duplicate {
            return Err(ArgumentError::InvalidStates(format!("duplicate state `{duplicate}`")));
        }

        // The metric name itself is used as the label carrying the state.
        let name = self.common.name.clone();
        let common = self.common.build(None, &[name.as_str()])?;
        let states: Arc<[String]> = self.states.into();

        let family = Family::new(common.label_names);
        let unlabeled = if family.label_names().is_empty() {
            let series = Arc::new(StateSetSeries::new(Arc::clone(&states)));
            family.insert(Labels::empty(), Arc::clone(&series));
            Some(series)
        } else {
            None
        };
        Ok(StateSet { metadata: common.metadata, family, unlabeled, states })
    }
}
