/// Options shared by the exposition format writers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpositionConfig {
    /// Write `_created` samples for counters, histograms and summaries.
    pub include_created_timestamps: bool,
    /// Write exemplars on every sample that carries one in OpenMetrics, not only on counters
    /// and histogram buckets.
    pub exemplars_on_all_metric_types: bool,
}

impl ExpositionConfig {
    /// Creates a config with every option disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables `_created` samples.
    #[must_use]
    pub fn include_created_timestamps(mut self, enabled: bool) -> Self {
        self.include_created_timestamps = enabled;
        self
    }

    /// Enables exemplars beyond counters and histogram buckets in OpenMetrics.
    #[must_use]
    pub fn exemplars_on_all_metric_types(mut self, enabled: bool) -> Self {
        self.exemplars_on_all_metric_types = enabled;
        self
    }
}
