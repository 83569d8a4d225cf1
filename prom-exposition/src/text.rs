//! The classic Prometheus text format, version 0.0.4.
use std::io::Write;

use prom_instrument::snapshot::{FamilyData, Metadata, MetricFamily};
use prom_instrument::{Labels, MetricSnapshots};

use crate::config::ExpositionConfig;
use crate::error::ExpositionError;
use crate::formats::ExpositionFormatWriter;
use crate::formatting::{
    format_double, write_double, write_help_line, write_millis_timestamp, write_name_and_labels,
    write_seconds_timestamp, write_type_line, write_u64, HelpEscaping,
};

/// Content type of the Prometheus text format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Writes snapshots in the Prometheus text format.
///
/// The text format has no notion of units, exemplars or created timestamps. Created timestamps,
/// when enabled, are written as separate `_created` gauge families after every other family.
#[derive(Clone, Debug, Default)]
pub struct PrometheusTextFormatWriter {
    config: ExpositionConfig,
}

impl PrometheusTextFormatWriter {
    /// Creates a writer with the given options.
    pub fn new(config: ExpositionConfig) -> Self {
        Self { config }
    }

    /// Renders the snapshots into a string.
    pub fn render(&self, snapshots: &MetricSnapshots) -> String {
        let mut buffer = String::new();
        for family in snapshots.iter().filter(|f| !f.data().is_empty()) {
            render_family(&mut buffer, family);
        }
        if self.config.include_created_timestamps {
            for family in snapshots.iter().filter(|f| !f.data().is_empty()) {
                render_created(&mut buffer, family);
            }
        }
        buffer
    }
}

impl ExpositionFormatWriter for PrometheusTextFormatWriter {
    fn accepts(&self, accept_header: &str) -> bool {
        accept_header.contains("text/plain")
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

fn render_family(buffer: &mut String, family: &MetricFamily) {
    let metadata = family.metadata();
    let name = metadata.name();

    match family.data() {
        FamilyData::Counter(points) => {
            write_metadata(buffer, metadata, Some("_total"), "counter");
            for point in points {
                write_name_and_labels(buffer, name, Some("_total"), &point.labels, None);
                write_double(buffer, point.value);
                end_line(buffer, point.scrape_timestamp_millis);
            }
        }
        FamilyData::Gauge(points) => {
            write_metadata(buffer, metadata, None, "gauge");
            for point in points {
                write_name_and_labels(buffer, name, None, &point.labels, None);
                write_double(buffer, point.value);
                end_line(buffer, point.scrape_timestamp_millis);
            }
        }
        FamilyData::Histogram(points) => {
            write_metadata(buffer, metadata, None, "histogram");
            for point in points {
                let mut cumulative = 0;
                for bucket in &point.buckets {
                    cumulative += bucket.count;
                    let le = format_double(bucket.upper_bound);
                    let le = Some(("le", le.as_str()));
                    write_name_and_labels(buffer, name, Some("_bucket"), &point.labels, le);
                    write_u64(buffer, cumulative);
                    end_line(buffer, point.scrape_timestamp_millis);
                }
                let timestamp = point.scrape_timestamp_millis;
                write_count_and_sum(buffer, name, &point.labels, cumulative, point.sum, timestamp);
            }
        }
        FamilyData::Summary(points) => {
            write_metadata(buffer, metadata, None, "summary");
            for point in points {
                for quantile in &point.quantiles {
                    let q = format_double(quantile.quantile);
                    let q = Some(("quantile", q.as_str()));
                    write_name_and_labels(buffer, name, None, &point.labels, q);
                    write_double(buffer, quantile.value);
                    end_line(buffer, point.scrape_timestamp_millis);
                }
                let timestamp = point.scrape_timestamp_millis;
                write_count_and_sum(buffer, name, &point.labels, point.count, point.sum, timestamp);
            }
        }
        FamilyData::Info(points) => {
            write_metadata(buffer, metadata, Some("_info"), "gauge");
            for point in points {
                write_name_and_labels(buffer, name, Some("_info"), &point.labels, None);
                buffer.push('1');
                end_line(buffer, point.scrape_timestamp_millis);
            }
        }
        FamilyData::StateSet(points) => {
            write_metadata(buffer, metadata, None, "gauge");
            for point in points {
                for state in &point.states {
                    let state_label = Some((name, state.name.as_str()));
                    write_name_and_labels(buffer, name, None, &point.labels, state_label);
                    buffer.push(if state.enabled { '1' } else { '0' });
                    end_line(buffer, point.scrape_timestamp_millis);
                }
            }
        }
        FamilyData::Unknown(points) => {
            write_metadata(buffer, metadata, None, "untyped");
            for point in points {
                write_name_and_labels(buffer, name, None, &point.labels, None);
                write_double(buffer, point.value);
                end_line(buffer, point.scrape_timestamp_millis);
            }
        }
    }
}

fn render_created(buffer: &mut String, family: &MetricFamily) {
    let created = match family.data() {
        FamilyData::Counter(points) => points
            .iter()
            .filter_map(|p| Some((&p.labels, p.created_millis?, p.scrape_timestamp_millis)))
            .collect::<Vec<_>>(),
        FamilyData::Histogram(points) => points
            .iter()
            .filter_map(|p| Some((&p.labels, p.created_millis?, p.scrape_timestamp_millis)))
            .collect(),
        FamilyData::Summary(points) => points
            .iter()
            .filter_map(|p| Some((&p.labels, p.created_millis?, p.scrape_timestamp_millis)))
            .collect(),
        _ => return,
    };
    if created.is_empty() {
        return;
    }

    let metadata = family.metadata();
    write_metadata(buffer, metadata, Some("_created"), "gauge");
    for (labels, created_millis, scrape_timestamp_millis) in created {
        write_name_and_labels(buffer, metadata.name(), Some("_created"), labels, None);
        write_seconds_timestamp(buffer, created_millis);
        end_line(buffer, scrape_timestamp_millis);
    }
}

fn write_metadata(
    buffer: &mut String,
    metadata: &Metadata,
    suffix: Option<&str>,
    metric_type: &str,
) {
    if let Some(help) = metadata.help() {
        write_help_line(buffer, metadata.name(), suffix, help, HelpEscaping::Prometheus);
    }
    write_type_line(buffer, metadata.name(), suffix, metric_type);
}

fn write_count_and_sum(
    buffer: &mut String,
    name: &str,
    labels: &Labels,
    count: u64,
    sum: f64,
    scrape_timestamp_millis: Option<i64>,
) {
    write_name_and_labels(buffer, name, Some("_count"), labels, None);
    write_u64(buffer, count);
    end_line(buffer, scrape_timestamp_millis);
    write_name_and_labels(buffer, name, Some("_sum"), labels, None);
    write_double(buffer, sum);
    end_line(buffer, scrape_timestamp_millis);
}

fn end_line(buffer: &mut String, scrape_timestamp_millis: Option<i64>) {
    if let Some(timestamp) = scrape_timestamp_millis {
        buffer.push(' ');
        write_millis_timestamp(buffer, timestamp);
    }
    buffer.push('\n');
}
