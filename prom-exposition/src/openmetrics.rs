//! The OpenMetrics text format, version 1.0.0.
use std::io::Write;

use prom_instrument::snapshot::{FamilyData, Metadata, MetricFamily};
use prom_instrument::{Exemplar, Labels, MetricSnapshots};

use crate::config::ExpositionConfig;
use crate::error::ExpositionError;
use crate::formats::ExpositionFormatWriter;
use crate::formatting::{
    format_double, write_double, write_exemplar, write_help_line, write_name_and_labels,
    write_seconds_timestamp, write_type_line, write_u64, write_unit_line, HelpEscaping,
};

/// Content type of the OpenMetrics text format.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Writes snapshots in the OpenMetrics text format.
///
/// Counters and histogram buckets carry their exemplars. Exemplars on gauges, unknown metrics
/// and the `_count` of histograms and summaries are only written when
/// [`ExpositionConfig::exemplars_on_all_metric_types`] is set.
#[derive(Clone, Debug, Default)]
pub struct OpenMetricsTextFormatWriter {
    config: ExpositionConfig,
}

struct Sample<'a> {
    labels: &'a Labels,
    scrape_timestamp_millis: Option<i64>,
}

impl OpenMetricsTextFormatWriter {
    /// Creates a writer with the given options.
    pub fn new(config: ExpositionConfig) -> Self {
        Self { config }
    }

    /// Renders the snapshots into a string, including the final `# EOF` line.
    pub fn render(&self, snapshots: &MetricSnapshots) -> String {
        let mut buffer = String::new();
        for family in snapshots.iter().filter(|f| !f.data().is_empty()) {
            self.render_family(&mut buffer, family);
        }
        buffer.push_str("# EOF\n");
        buffer
    }

    fn render_family(&self, buffer: &mut String, family: &MetricFamily) {
        let metadata = family.metadata();
        let name = metadata.name();
        let all_types = self.config.exemplars_on_all_metric_types;

        match family.data() {
            FamilyData::Counter(points) => {
                write_metadata(buffer, metadata, "counter");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    write_name_and_labels(buffer, name, Some("_total"), sample.labels, None);
                    write_double(buffer, point.value);
                    sample.end(buffer, point.exemplar.as_ref());
                    self.write_created(buffer, name, &sample, point.created_millis);
                }
            }
            FamilyData::Gauge(points) => {
                // Gauge data points carry no exemplar.
                write_metadata(buffer, metadata, "gauge");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    write_name_and_labels(buffer, name, None, sample.labels, None);
                    write_double(buffer, point.value);
                    sample.end(buffer, None);
                }
            }
            FamilyData::Histogram(points) => {
                write_metadata(buffer, metadata, "histogram");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    let mut cumulative = 0;
                    let mut lower = f64::NEG_INFINITY;
                    for bucket in &point.buckets {
                        cumulative += bucket.count;
                        let le = format_double(bucket.upper_bound);
                        let le = Some(("le", le.as_str()));
                        write_name_and_labels(buffer, name, Some("_bucket"), sample.labels, le);
                        write_u64(buffer, cumulative);
                        sample.end(buffer, point.exemplar_in(lower, bucket.upper_bound));
                        lower = bucket.upper_bound;
                    }

                    let latest = all_types.then(|| latest(&point.exemplars)).flatten();
                    sample.write_count_and_sum(buffer, name, cumulative, point.sum, latest);
                    self.write_created(buffer, name, &sample, point.created_millis);
                }
            }
            FamilyData::Summary(points) => {
                write_metadata(buffer, metadata, "summary");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    for quantile in &point.quantiles {
                        let q = format_double(quantile.quantile);
                        let q = Some(("quantile", q.as_str()));
                        write_name_and_labels(buffer, name, None, sample.labels, q);
                        write_double(buffer, quantile.value);
                        sample.end(buffer, None);
                    }

                    let latest = all_types.then(|| latest(&point.exemplars)).flatten();
                    sample.write_count_and_sum(buffer, name, point.count, point.sum, latest);
                    self.write_created(buffer, name, &sample, point.created_millis);
                }
            }
            FamilyData::Info(points) => {
                write_metadata(buffer, metadata, "info");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    write_name_and_labels(buffer, name, Some("_info"), sample.labels, None);
                    buffer.push('1');
                    sample.end(buffer, None);
                }
            }
            FamilyData::StateSet(points) => {
                write_metadata(buffer, metadata, "stateset");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    for state in &point.states {
                        let state_label = Some((name, state.name.as_str()));
                        write_name_and_labels(buffer, name, None, sample.labels, state_label);
                        buffer.push(if state.enabled { '1' } else { '0' });
                        sample.end(buffer, None);
                    }
                }
            }
            FamilyData::Unknown(points) => {
                write_metadata(buffer, metadata, "unknown");
                for point in points {
                    let sample = Sample::new(&point.labels, point.scrape_timestamp_millis);
                    write_name_and_labels(buffer, name, None, sample.labels, None);
                    write_double(buffer, point.value);
                    sample.end(buffer, point.exemplar.as_ref().filter(|_| all_types));
                }
            }
        }
    }

    fn write_created(
        &self,
        buffer: &mut String,
        name: &str,
        sample: &Sample<'_>,
        created_millis: Option<i64>,
    ) {
        let Some(created_millis) = created_millis else {
            return;
        };
        if self.config.include_created_timestamps {
            write_name_and_labels(buffer, name, Some("_created"), sample.labels, None);
            write_seconds_timestamp(buffer, created_millis);
            sample.end(buffer, None);
        }
    }
}

impl<'a> Sample<'a> {
    fn new(labels: &'a Labels, scrape_timestamp_millis: Option<i64>) -> Self {
        Self { labels, scrape_timestamp_millis }
    }

    /// Finishes a sample line with the optional timestamp and exemplar.
    fn end(&self, buffer: &mut String, exemplar: Option<&Exemplar>) {
        if let Some(timestamp) = self.scrape_timestamp_millis {
            buffer.push(' ');
            write_seconds_timestamp(buffer, timestamp);
        }
        if let Some(exemplar) = exemplar {
            write_exemplar(buffer, exemplar);
        }
        buffer.push('\n');
    }

    fn write_count_and_sum(
        &self,
        buffer: &mut String,
        name: &str,
        count: u64,
        sum: f64,
        count_exemplar: Option<&Exemplar>,
    ) {
        write_name_and_labels(buffer, name, Some("_count"), self.labels, None);
        write_u64(buffer, count);
        self.end(buffer, count_exemplar);
        write_name_and_labels(buffer, name, Some("_sum"), self.labels, None);
        write_double(buffer, sum);
        self.end(buffer, None);
    }
}

impl ExpositionFormatWriter for OpenMetricsTextFormatWriter {
    fn accepts(&self, accept_header: &str) -> bool {
        accept_header.contains("application/openmetrics-text")
    }

    fn content_type(&self) -> &str {
        CONTENT_TYPE
    }

    fn write(
        &self,
        out: &mut dyn Write,
        snapshots: &MetricSnapshots,
    ) -> Result<(), ExpositionError> {
        out.write_all(self.render(snapshots).as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn write_metadata(buffer: &mut String, metadata: &Metadata, metric_type: &str) {
    write_type_line(buffer, metadata.name(), None, metric_type);
    if let Some(unit) = metadata.unit() {
        write_unit_line(buffer, metadata.name(), unit.as_str());
    }
    if let Some(help) = metadata.help() {
        write_help_line(buffer, metadata.name(), None, help, HelpEscaping::OpenMetrics);
    }
}

/// The exemplar with the most recent timestamp. Exemplars without a timestamp only win if no
/// other exemplar has one.
fn latest(exemplars: &[Exemplar]) -> Option<&Exemplar> {
    exemplars.iter().max_by_key(|e| e.timestamp_millis().unwrap_or(i64::MIN))
}
