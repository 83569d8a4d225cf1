//! Exemplars and exemplar sampling.
//!
//! An exemplar links a single observation to the trace that produced it. Trace information is
//! consumed through the [`SpanContext`] capability, which a tracing integration supplies when the
//! application is wired together; without one, [`NoopExemplarSampler`] never produces exemplars.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::ArgumentError;
use crate::labels::Labels;
use crate::scheduler::Scheduler;

/// Maximum combined number of characters of all exemplar label names and values.
pub const MAX_EXEMPLAR_LABEL_CHARS: usize = 128;

/// Label name carrying the trace id.
pub const TRACE_ID: &str = "trace_id";

/// Label name carrying the span id.
pub const SPAN_ID: &str = "span_id";

/// Default minimum age of an exemplar before it may be replaced.
///
/// A prime number of milliseconds, so that replacement does not run in lockstep with scrape
/// intervals.
pub const DEFAULT_MIN_RETENTION_INTERVAL: Duration = Duration::from_millis(7109);

/// A sampled observation with the trace it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    value: f64,
    labels: Labels,
    timestamp_millis: Option<i64>,
}

impl Exemplar {
    /// Creates an exemplar.
    ///
    /// Fails if the labels exceed [`MAX_EXEMPLAR_LABEL_CHARS`].
    pub fn new(
        value: f64,
        labels: Labels,
        timestamp_millis: Option<i64>,
    ) -> Result<Self, ArgumentError> {
        let len = labels.char_count();
        if len > MAX_EXEMPLAR_LABEL_CHARS {
            return Err(ArgumentError::ExemplarLabelBudget { len, max: MAX_EXEMPLAR_LABEL_CHARS });
        }
        Ok(Self { value, labels, timestamp_millis })
    }

    /// The observed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Trace labels, usually `trace_id` and `span_id`.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// When the observation was made, in milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp_millis
    }
}

/// Access to the trace active on the current thread.
pub trait SpanContext: Send + Sync + 'static {
    /// The current trace id, if a span is active.
    fn trace_id(&self) -> Option<String>;

    /// The current span id, if a span is active.
    fn span_id(&self) -> Option<String>;

    /// Whether the current trace is sampled. Unsampled traces never become exemplars.
    fn is_sampled(&self) -> bool;
}

/// Decides whether an observation replaces the exemplar currently held by a series.
pub trait ExemplarSampler: Send + Sync + 'static {
    /// Returns a new exemplar for `value`, or `None` to keep `previous` unchanged.
    fn sample(&self, value: f64, previous: Option<&Exemplar>) -> Option<Exemplar>;
}

/// A sampler that never produces exemplars.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExemplarSampler;

impl ExemplarSampler for NoopExemplarSampler {
    fn sample(&self, _: f64, _: Option<&Exemplar>) -> Option<Exemplar> {
        None
    }
}

/// Samples the current trace onto an observation at most once per retention interval.
///
/// Without a scheduler the interval is checked per series, against the timestamp of the
/// exemplar being replaced. With one, see [`DefaultExemplarSamplerBuilder::scheduler`], the
/// sampler also closes a shared gate after every new exemplar and the scheduler reopens it once
/// the interval has passed, so observations in between skip trace lookups altogether.
pub struct DefaultExemplarSampler {
    span_context: Arc<dyn SpanContext>,
    clock: Arc<dyn Clock>,
    min_retention_interval: Duration,
    min_retention_millis: i64,
    gate: Option<Gate>,
}

struct Gate {
    scheduler: Arc<Scheduler>,
    accepting: Arc<AtomicBool>,
}

impl Gate {
    fn is_open(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn close_until(&self, delay: Duration) {
        if self
            .accepting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let accepting = Arc::clone(&self.accepting);
        let reopen = move || accepting.store(true, Ordering::Release);
        if let Err(error) = self.scheduler.schedule_once(delay, reopen) {
            debug!(%error, "could not schedule exemplar gate reopening, leaving it open");
            self.accepting.store(true, Ordering::Release);
        }
    }
}

impl DefaultExemplarSampler {
    /// Creates a sampler with the default retention interval and the system clock.
    pub fn new(span_context: Arc<dyn SpanContext>) -> Self {
        Self::builder(span_context).build()
    }

    /// Starts building a sampler reading traces from `span_context`.
    pub fn builder(span_context: Arc<dyn SpanContext>) -> DefaultExemplarSamplerBuilder {
        DefaultExemplarSamplerBuilder {
            span_context,
            clock: Arc::new(SystemClock),
            min_retention_interval: DEFAULT_MIN_RETENTION_INTERVAL,
            scheduler: None,
        }
    }

    fn trace_labels(&self) -> Option<Labels> {
        if !self.span_context.is_sampled() {
            return None;
        }
        let trace_id = self.span_context.trace_id()?;
        let span_id = self.span_context.span_id()?;
        Labels::of(&[TRACE_ID, SPAN_ID], &[trace_id, span_id]).ok()
    }
}

impl ExemplarSampler for DefaultExemplarSampler {
    fn sample(&self, value: f64, previous: Option<&Exemplar>) -> Option<Exemplar> {
        if self.gate.as_ref().is_some_and(|gate| !gate.is_open()) {
            return None;
        }
        let now = self.clock.now_millis();
        if let Some(ts) = previous.and_then(Exemplar::timestamp_millis) {
            if now - ts <= self.min_retention_millis {
                return None;
            }
        }

        let labels = self.trace_labels()?;
        let exemplar = Exemplar::new(value, labels, Some(now)).ok()?;
        if let Some(gate) = &self.gate {
            gate.close_until(self.min_retention_interval);
        }
        Some(exemplar)
    }
}

/// Builder for [`DefaultExemplarSampler`].
#[must_use]
pub struct DefaultExemplarSamplerBuilder {
    span_context: Arc<dyn SpanContext>,
    clock: Arc<dyn Clock>,
    min_retention_interval: Duration,
    scheduler: Option<Arc<Scheduler>>,
}

impl DefaultExemplarSamplerBuilder {
    /// Sets the minimum age of an exemplar before it may be replaced.
    ///
    /// Defaults to [`DEFAULT_MIN_RETENTION_INTERVAL`].
    pub fn min_retention_interval(mut self, interval: Duration) -> Self {
        self.min_retention_interval = interval;
        self
    }

    /// Sets the clock used to timestamp exemplars.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reopens a shared sampling gate on `scheduler` after each retention interval.
    ///
    /// The scheduler's thread is only started by the first exemplar.
    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builds the sampler.
    pub fn build(self) -> DefaultExemplarSampler {
        DefaultExemplarSampler {
            span_context: self.span_context,
            clock: self.clock,
            min_retention_interval: self.min_retention_interval,
            min_retention_millis: i64::try_from(self.min_retention_interval.as_millis())
                .unwrap_or(i64::MAX),
            gate: self.scheduler.map(|scheduler| Gate {
                scheduler,
                accepting: Arc::new(AtomicBool::new(true)),
            }),
        }
    }
}
