//! Metric primitives, streaming quantiles and a collecting registry for Prometheus-style
//! instrumentation.
//!
//! Metrics are built with their builder, shared as `Arc`s, and registered with a [`Registry`].
//! Writers update series through atomics without taking any registry lock; a scrape calls
//! [`Registry::collect`], which snapshots every registered [`Collector`] into
//! [`MetricSnapshots`] ready to be encoded by an exposition format.
//!
//! ```
//! use std::sync::Arc;
//!
//! use prom_instrument::{Counter, Registry};
//!
//! let registry = Registry::new();
//! let requests = Arc::new(
//!     Counter::builder("http_requests_total")
//!         .help("Total number of HTTP requests.")
//!         .label_names(["method", "status"])
//!         .build()?,
//! );
//! registry.register(requests.clone())?;
//!
//! requests.with_label_values(&["GET", "200"])?.inc();
//!
//! let (snapshots, partial_failure) = registry.collect().into_parts();
//! assert!(!partial_failure);
//! assert_eq!(snapshots.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![deny(missing_docs)]

mod atomics;
pub use self::atomics::AtomicF64;

pub mod ckms;

mod clock;
pub use self::clock::{Clock, MockClock, SystemClock};

mod collector;
pub use self::collector::{Collector, Descriptor};

mod error;
pub use self::error::{
    ArgumentError, CollectorError, LabelError, QuantileError, RegistrationError, SchedulerError,
};

pub mod exemplar;
pub use self::exemplar::{
    DefaultExemplarSampler, Exemplar, ExemplarSampler, NoopExemplarSampler, SpanContext,
};

mod labels;
pub use self::labels::{Labels, MAX_LABEL_VALUE_LEN};

pub mod metrics;
pub use self::metrics::{Counter, Gauge, Histogram, Info, StateSet, Summary};

pub mod naming;

mod registry;
pub use self::registry::{Registry, Scrape};

mod scheduler;
pub use self::scheduler::{Scheduler, TaskHandle};

pub mod snapshot;
pub use self::snapshot::{MetricFamily, MetricSnapshots, MetricType};

mod unit;
pub use self::unit::Unit;

mod window;
pub use self::window::{TimeWindowQuantiles, DEFAULT_AGE_BUCKETS, DEFAULT_MAX_AGE};

use once_cell::sync::Lazy;

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// A process-wide registry for application wiring.
///
/// Nothing in this crate registers with it implicitly; libraries should accept a [`Registry`]
/// instead of reaching for this one.
pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}
