//! Error types.
//!
//! Every error here is raised at the call site that caused it, with the exception of
//! [`CollectorError`], which the [`Registry`](crate::Registry) catches and aggregates during a
//! scrape.
use thiserror::Error as ThisError;

/// Errors produced while validating label names or building a label set.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum LabelError {
    /// A label name was empty.
    #[error("label names must not be empty")]
    EmptyName,

    /// A label name contained characters outside of `[a-zA-Z0-9_]`, or started with a digit.
    #[error("label name `{0}` is not valid")]
    InvalidName(String),

    /// A label name starting with `__` was used.
    #[error("label name `{0}` is reserved")]
    ReservedName(String),

    /// The same label name was given more than once.
    #[error("duplicate label name `{0}`")]
    DuplicateName(String),

    /// The number of label values did not match the number of declared label names.
    #[error("expected {expected} label values, got {actual}")]
    ArityMismatch {
        /// Number of declared label names.
        expected: usize,
        /// Number of values given.
        actual: usize,
    },

    /// A label value exceeded the maximum supported length.
    #[error("value of label `{name}` is {len} bytes long, maximum is {max}")]
    ValueTooLong {
        /// Name of the label.
        name: String,
        /// Length of the value, in bytes.
        len: usize,
        /// Maximum length, in bytes.
        max: usize,
    },
}

/// Errors produced by invalid arguments to metric operations or builders.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ArgumentError {
    /// Counters can only go up.
    #[error("counter increment must not be negative, got {0}")]
    NegativeIncrement(f64),

    /// The combined length of all exemplar label names and values exceeded the budget.
    #[error("exemplar labels have {len} characters, maximum is {max}")]
    ExemplarLabelBudget {
        /// Characters used by the labels.
        len: usize,
        /// Characters allowed.
        max: usize,
    },

    /// A metric name was empty or not valid under the Prometheus data model.
    #[error("metric name `{0}` is not valid")]
    InvalidMetricName(String),

    /// A metric name ended with a suffix that encoders add themselves.
    #[error("metric name `{name}` must not end with `{suffix}`")]
    ReservedMetricNameSuffix {
        /// The rejected name.
        name: String,
        /// The reserved suffix it ends with.
        suffix: &'static str,
    },

    /// A unit contained characters outside of `[a-zA-Z0-9_]`.
    #[error("unit `{0}` is not valid")]
    InvalidUnit(String),

    /// A histogram bucket layout was empty, unsorted or contained NaN.
    #[error("invalid histogram buckets: {0}")]
    InvalidBuckets(String),

    /// A quantile target was outside of its allowed range.
    #[error("invalid quantile target (quantile = {quantile}, epsilon = {epsilon})")]
    InvalidQuantile {
        /// The requested quantile.
        quantile: f64,
        /// The requested rank error.
        epsilon: f64,
    },

    /// A state set was declared without states, or with the same state twice.
    #[error("invalid state set: {0}")]
    InvalidStates(String),

    /// A state name that was never declared was referenced.
    #[error("unknown state `{0}`")]
    UnknownState(String),

    /// A sliding window was configured with a zero duration or zero buckets.
    #[error("invalid sliding window: {0}")]
    InvalidWindow(String),

    /// A label value was missing for a declared label name.
    #[error("missing value for label `{0}`")]
    MissingLabelValue(String),

    /// A label name used by the metric itself was declared.
    #[error(transparent)]
    Label(#[from] LabelError),
}

/// Errors produced when registering a collector.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RegistrationError {
    /// The very same collector instance was registered twice.
    #[error("collector `{0}` is already registered")]
    Duplicate(String),

    /// A collector with the same name but a different metric type is already registered.
    #[error("metric `{name}` is already registered as a {existing}, cannot register it as a {requested}")]
    ConflictingType {
        /// Metric name.
        name: String,
        /// Type already registered under the name.
        existing: &'static str,
        /// Type of the rejected collector.
        requested: &'static str,
    },

    /// A collector with the same name and the same set of label names is already registered.
    #[error("metric `{name}` is already registered with label names {label_names:?}")]
    DuplicateLabelSchema {
        /// Metric name.
        name: String,
        /// The label names both collectors declare.
        label_names: Vec<String>,
    },
}

/// Errors produced when querying a quantile estimator.
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum QuantileError {
    /// No value has been inserted yet.
    #[error("no observations have been recorded")]
    NoData,

    /// The quantile was not declared as a target when the estimator was created.
    #[error("quantile {0} is not a tracked target")]
    UntrackedQuantile(f64),
}

/// A failure raised while a single collector was collecting.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("collector `{collector}` failed: {message}")]
pub struct CollectorError {
    collector: String,
    message: String,
}

impl CollectorError {
    /// Creates a new `CollectorError`.
    pub fn new(collector: impl Into<String>, message: impl Into<String>) -> Self {
        Self { collector: collector.into(), message: message.into() }
    }

    /// Name of the collector that failed.
    pub fn collector(&self) -> &str {
        &self.collector
    }

    /// Human-readable reason for the failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors produced by the [`Scheduler`](crate::Scheduler).
#[derive(Debug, ThisError)]
pub enum SchedulerError {
    /// The worker thread could not be spawned.
    #[error("failed to spawn the scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The scheduler was shut down.
    #[error("the scheduler has been shut down")]
    Shutdown,
}
