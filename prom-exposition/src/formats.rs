//! Format writers and content negotiation.
use std::io::Write;

use prom_instrument::MetricSnapshots;
use tracing::warn;

use crate::config::ExpositionConfig;
use crate::error::ExpositionError;
use crate::openmetrics::OpenMetricsTextFormatWriter;
use crate::text::PrometheusTextFormatWriter;

/// Content type of the delimited protobuf format.
pub const PROTOBUF_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited";

/// Serializes metric snapshots in one exposition format.
pub trait ExpositionFormatWriter: Send + Sync {
    /// Whether this writer produces a format listed in the given `Accept` header.
    fn accepts(&self, accept_header: &str) -> bool;

    /// The `Content-Type` of the output.
    fn content_type(&self) -> &str;

    /// Writes the snapshots to `out`.
    fn write(&self, out: &mut dyn Write, snapshots: &MetricSnapshots)
        -> Result<(), ExpositionError>;

    /// Writes the snapshots into a byte buffer.
    fn to_bytes(&self, snapshots: &MetricSnapshots) -> Result<Vec<u8>, ExpositionError> {
        let mut output = Vec::new();
        self.write(&mut output, snapshots)?;
        Ok(output)
    }
}

/// Stands in for the protobuf writer when none is available. Every write fails with
/// [`ExpositionError::FormatUnavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableProtobufWriter;

impl ExpositionFormatWriter for UnavailableProtobufWriter {
    fn accepts(&self, accept_header: &str) -> bool {
        accepts_protobuf(accept_header)
    }

    fn content_type(&self) -> &str {
        PROTOBUF_CONTENT_TYPE
    }

    fn write(&self, _: &mut dyn Write, _: &MetricSnapshots) -> Result<(), ExpositionError> {
        warn!(content_type = PROTOBUF_CONTENT_TYPE, "no protobuf writer available");
        Err(ExpositionError::FormatUnavailable(PROTOBUF_CONTENT_TYPE.to_string()))
    }
}

pub(crate) fn accepts_protobuf(accept_header: &str) -> bool {
    accept_header.contains("application/vnd.google.protobuf")
        && accept_header.contains("io.prometheus.client.MetricFamily")
}

/// The set of writers a scrape endpoint negotiates between.
pub struct ExpositionFormats {
    protobuf: Box<dyn ExpositionFormatWriter>,
    openmetrics: OpenMetricsTextFormatWriter,
    text: PrometheusTextFormatWriter,
}

impl ExpositionFormats {
    /// Creates the default writers.
    ///
    /// The protobuf slot holds the protobuf writer when the `protobuf` feature is enabled, and
    /// an [`UnavailableProtobufWriter`] otherwise.
    pub fn new(config: ExpositionConfig) -> Self {
        #[cfg(feature = "protobuf")]
        let protobuf: Box<dyn ExpositionFormatWriter> =
            Box::new(crate::protobuf::PrometheusProtobufWriter::new(config));
        #[cfg(not(feature = "protobuf"))]
        let protobuf: Box<dyn ExpositionFormatWriter> = Box::new(UnavailableProtobufWriter);

        Self {
            protobuf,
            openmetrics: OpenMetricsTextFormatWriter::new(config),
            text: PrometheusTextFormatWriter::new(config),
        }
    }

    /// Creates the default writers with an empty protobuf slot.
    pub fn without_protobuf(config: ExpositionConfig) -> Self {
        Self::new(config).with_protobuf_writer(Box::new(UnavailableProtobufWriter))
    }

    /// Replaces the writer used for protobuf requests.
    #[must_use]
    pub fn with_protobuf_writer(mut self, writer: Box<dyn ExpositionFormatWriter>) -> Self {
        self.protobuf = writer;
        self
    }

    /// Picks the writer for a request's `Accept` header.
    ///
    /// Protobuf is preferred, then OpenMetrics. Anything else, including a missing header, gets
    /// the Prometheus text format.
    pub fn find_writer(&self, accept_header: Option<&str>) -> &dyn ExpositionFormatWriter {
        let Some(accept_header) = accept_header else {
            return &self.text;
        };
        if self.protobuf.accepts(accept_header) {
            self.protobuf.as_ref()
        } else if self.openmetrics.accepts(accept_header) {
            &self.openmetrics
        } else {
            &self.text
        }
    }

    /// The protobuf writer, an [`UnavailableProtobufWriter`] unless one was configured.
    pub fn protobuf_writer(&self) -> &dyn ExpositionFormatWriter {
        self.protobuf.as_ref()
    }

    /// The OpenMetrics writer.
    pub fn openmetrics_writer(&self) -> &OpenMetricsTextFormatWriter {
        &self.openmetrics
    }

    /// The Prometheus text writer.
    pub fn text_writer(&self) -> &PrometheusTextFormatWriter {
        &self.text
    }
}

impl Default for ExpositionFormats {
    fn default() -> Self {
        Self::new(ExpositionConfig::default())
    }
}
