//! Exposition formats for [`prom_instrument`] snapshots.
//!
//! Three formats are supported: the classic Prometheus text format, OpenMetrics text, and
//! length-delimited protobuf (behind the `protobuf` feature, enabled by default).
//! [`ExpositionFormats::find_writer`] picks one from a scrape request's `Accept` header.
//!
//! ```
//! use std::sync::Arc;
//!
//! use prom_exposition::{ExpositionConfig, ExpositionFormats};
//! use prom_instrument::{Counter, Registry};
//!
//! let registry = Registry::new();
//! let jobs = Arc::new(Counter::builder("jobs").help("Jobs processed.").build()?);
//! registry.register(jobs.clone())?;
//! jobs.inc()?;
//!
//! let formats = ExpositionFormats::new(ExpositionConfig::default());
//! let writer = formats.find_writer(Some("text/plain"));
//! let (snapshots, _) = registry.collect().into_parts();
//! let body = writer.to_bytes(&snapshots)?;
//! assert_eq!(
//!     String::from_utf8(body)?,
//!     "# HELP jobs_total Jobs processed.\n# TYPE jobs_total counter\njobs_total 1.0\n"
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
pub use self::config::ExpositionConfig;

mod error;
pub use self::error::ExpositionError;

mod formats;
pub use self::formats::{
    ExpositionFormatWriter, ExpositionFormats, UnavailableProtobufWriter, PROTOBUF_CONTENT_TYPE,
};

mod formatting;

pub mod openmetrics;
pub use self::openmetrics::OpenMetricsTextFormatWriter;

#[cfg(feature = "protobuf")]
#[cfg_attr(docsrs, doc(cfg(feature = "protobuf")))]
pub mod protobuf;
#[cfg(feature = "protobuf")]
pub use self::protobuf::PrometheusProtobufWriter;

pub mod text;
pub use self::text::PrometheusTextFormatWriter;
