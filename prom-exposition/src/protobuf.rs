//! The Prometheus protobuf format, with each family written as a length-delimited
//! `io.prometheus.client.MetricFamily` message.
use std::io::Write;

use prom_instrument::snapshot::{FamilyData, MetricFamily};
use prom_instrument::{Exemplar, Labels, MetricSnapshots};
use prost::Message;
use tracing::trace;

use crate::config::ExpositionConfig;
use crate::error::ExpositionError;
use crate::formats::{accepts_protobuf, ExpositionFormatWriter, PROTOBUF_CONTENT_TYPE};

/// Messages of the `io.prometheus.client` package, restricted to the fields written here.
pub mod pb {
    #![allow(missing_docs, clippy::doc_markdown)]

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct LabelPair {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub value: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Gauge {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Counter {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
        #[prost(message, optional, tag = "2")]
        pub exemplar: Option<Exemplar>,
        #[prost(message, optional, tag = "3")]
        pub created_timestamp: Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Quantile {
        #[prost(double, optional, tag = "1")]
        pub quantile: Option<f64>,
        #[prost(double, optional, tag = "2")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Summary {
        #[prost(uint64, optional, tag = "1")]
        pub sample_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub sample_sum: Option<f64>,
        #[prost(message, repeated, tag = "3")]
        pub quantile: Vec<Quantile>,
        #[prost(message, optional, tag = "4")]
        pub created_timestamp: Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Untyped {
        #[prost(double, optional, tag = "1")]
        pub value: Option<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Histogram {
        #[prost(uint64, optional, tag = "1")]
        pub sample_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub sample_sum: Option<f64>,
        #[prost(message, repeated, tag = "3")]
        pub bucket: Vec<Bucket>,
        #[prost(double, optional, tag = "4")]
        pub sample_count_float: Option<f64>,
        #[prost(message, optional, tag = "15")]
        pub created_timestamp: Option<::prost_types::Timestamp>,
        #[prost(message, repeated, tag = "16")]
        pub exemplars: Vec<Exemplar>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Bucket {
        #[prost(uint64, optional, tag = "1")]
        pub cumulative_count: Option<u64>,
        #[prost(double, optional, tag = "2")]
        pub upper_bound: Option<f64>,
        #[prost(message, optional, tag = "3")]
        pub exemplar: Option<Exemplar>,
        #[prost(double, optional, tag = "4")]
        pub cumulative_count_float: Option<f64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Exemplar {
        #[prost(message, repeated, tag = "1")]
        pub label: Vec<LabelPair>,
        #[prost(double, optional, tag = "2")]
        pub value: Option<f64>,
        #[prost(message, optional, tag = "3")]
        pub timestamp: Option<::prost_types::Timestamp>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Metric {
        #[prost(message, repeated, tag = "1")]
        pub label: Vec<LabelPair>,
        #[prost(message, optional, tag = "2")]
        pub gauge: Option<Gauge>,
        #[prost(message, optional, tag = "3")]
        pub counter: Option<Counter>,
        #[prost(message, optional, tag = "4")]
        pub summary: Option<Summary>,
        #[prost(message, optional, tag = "5")]
        pub untyped: Option<Untyped>,
        #[prost(int64, optional, tag = "6")]
        pub timestamp_ms: Option<i64>,
        #[prost(message, optional, tag = "7")]
        pub histogram: Option<Histogram>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MetricFamily {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub help: Option<String>,
        #[prost(enumeration = "MetricType", optional, tag = "3")]
        pub r#type: Option<i32>,
        #[prost(message, repeated, tag = "4")]
        pub metric: Vec<Metric>,
        #[prost(string, optional, tag = "5")]
        pub unit: Option<String>,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MetricType {
        Counter = 0,
        Gauge = 1,
        Summary = 2,
        Untyped = 3,
        Histogram = 4,
        GaugeHistogram = 5,
    }
}

/// Writes snapshots as a stream of length-delimited `MetricFamily` messages.
///
/// Info and state set families are written as gauges, unknown families as untyped.
#[derive(Clone, Debug, Default)]
pub struct PrometheusProtobufWriter {
    config: ExpositionConfig,
}

impl PrometheusProtobufWriter {
    /// Creates a writer with the given options.
    pub fn new(config: ExpositionConfig) -> Self {
        Self { config }
    }

    /// Converts one family into its protobuf message, or `None` if it has no data points.
    pub fn to_protobuf(&self, family: &MetricFamily) -> Option<pb::MetricFamily> {
        if family.data().is_empty() {
            trace!(name = family.metadata().name(), "skipping family without data points");
            return None;
        }

        let metadata = family.metadata();
        let name = metadata.name();
        let created = |millis: Option<i64>| {
            millis.filter(|_| self.config.include_created_timestamps).map(timestamp)
        };

        let converted: (String, pb::MetricType, Vec<pb::Metric>) = match family.data() {
            FamilyData::Counter(points) => {
                let metric = points
                    .iter()
                    .map(|point| pb::Metric {
                        label: label_pairs(&point.labels, None),
                        counter: Some(pb::Counter {
                            value: Some(point.value),
                            exemplar: point.exemplar.as_ref().map(exemplar),
                            created_timestamp: created(point.created_millis),
                        }),
                        timestamp_ms: point.scrape_timestamp_millis,
                        ..Default::default()
                    })
                    .collect();
                (format!("{name}_total"), pb::MetricType::Counter, metric)
            }
            FamilyData::Gauge(points) => {
                let metric = points
                    .iter()
                    .map(|p| gauge_metric(&p.labels, None, p.value, p.scrape_timestamp_millis))
                    .collect();
                (name.to_string(), pb::MetricType::Gauge, metric)
            }
            FamilyData::Histogram(points) => {
                let metric = points
                    .iter()
                    .map(|point| {
                        let mut cumulative = 0;
                        let mut lower = f64::NEG_INFINITY;
                        let bucket = point
                            .buckets
                            .iter()
                            .map(|b| {
                                cumulative += b.count;
                                let sampled = point.exemplar_in(lower, b.upper_bound);
                                let bucket = pb::Bucket {
                                    cumulative_count: Some(cumulative),
                                    upper_bound: Some(b.upper_bound),
                                    exemplar: sampled.map(exemplar),
                                    ..Default::default()
                                };
                                lower = b.upper_bound;
                                bucket
                            })
                            .collect();
                        pb::Metric {
                            label: label_pairs(&point.labels, None),
                            histogram: Some(pb::Histogram {
                                sample_count: Some(point.count()),
                                sample_sum: Some(point.sum),
                                bucket,
                                created_timestamp: created(point.created_millis),
                                ..Default::default()
                            }),
                            timestamp_ms: point.scrape_timestamp_millis,
                            ..Default::default()
                        }
                    })
                    .collect();
                (name.to_string(), pb::MetricType::Histogram, metric)
            }
            FamilyData::Summary(points) => {
                let metric = points
                    .iter()
                    .map(|point| pb::Metric {
                        label: label_pairs(&point.labels, None),
                        summary: Some(pb::Summary {
                            sample_count: Some(point.count),
                            sample_sum: Some(point.sum),
                            quantile: point
                                .quantiles
                                .iter()
                                .map(|q| pb::Quantile {
                                    quantile: Some(q.quantile),
                                    value: Some(q.value),
                                })
                                .collect(),
                            created_timestamp: created(point.created_millis),
                        }),
                        timestamp_ms: point.scrape_timestamp_millis,
                        ..Default::default()
                    })
                    .collect();
                (name.to_string(), pb::MetricType::Summary, metric)
            }
            FamilyData::Info(points) => {
                let metric = points
                    .iter()
                    .map(|p| gauge_metric(&p.labels, None, 1.0, p.scrape_timestamp_millis))
                    .collect();
                (format!("{name}_info"), pb::MetricType::Gauge, metric)
            }
            FamilyData::StateSet(points) => {
                let metric = points
                    .iter()
                    .flat_map(|point| {
                        point.states.iter().map(move |state| {
                            let value = if state.enabled { 1.0 } else { 0.0 };
                            let state_label = Some((name, state.name.as_str()));
                            let timestamp = point.scrape_timestamp_millis;
                            gauge_metric(&point.labels, state_label, value, timestamp)
                        })
                    })
                    .collect();
                (name.to_string(), pb::MetricType::Gauge, metric)
            }
            FamilyData::Unknown(points) => {
                let metric = points
                    .iter()
                    .map(|point| pb::Metric {
                        label: label_pairs(&point.labels, None),
                        untyped: Some(pb::Untyped { value: Some(point.value) }),
                        timestamp_ms: point.scrape_timestamp_millis,
                        ..Default::default()
                    })
                    .collect();
                (name.to_string(), pb::MetricType::Untyped, metric)
            }
        };

        let (name, metric_type, metric) = converted;
        Some(pb::MetricFamily {
            name: Some(name),
            help: metadata.help().map(str::to_string),
            r#type: Some(metric_type as i32),
            metric,
            unit: metadata.unit().map(|unit| unit.as_str().to_string()),
        })
    }
}

impl ExpositionFormatWriter for PrometheusProtobufWriter {
    fn accepts(&self, accept_header: &str) -> bool {
        accepts_protobuf(accept_header)
    }

    fn content_type(&self) -> &str {
        PROTOBUF_CONTENT_TYPE
    }

    fn write(
        &self,
        out: &mut dyn Write,
        snapshots: &MetricSnapshots,
    ) -> Result<(), ExpositionError> {
        let mut output = Vec::new();
        for family in snapshots.iter().filter_map(|family| self.to_protobuf(family)) {
            family.encode_length_delimited(&mut output)?;
        }
        out.write_all(&output)?;
        out.flush()?;
        Ok(())
    }
}

fn gauge_metric(
    labels: &Labels,
    additional_label: Option<(&str, &str)>,
    value: f64,
    scrape_timestamp_millis: Option<i64>,
) -> pb::Metric {
    pb::Metric {
        label: label_pairs(labels, additional_label),
        gauge: Some(pb::Gauge { value: Some(value) }),
        timestamp_ms: scrape_timestamp_millis,
        ..Default::default()
    }
}

fn label_pairs(labels: &Labels, additional_label: Option<(&str, &str)>) -> Vec<pb::LabelPair> {
    labels
        .iter()
        .chain(additional_label)
        .map(|(name, value)| pb::LabelPair {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        })
        .collect()
}

fn exemplar(exemplar: &Exemplar) -> pb::Exemplar {
    pb::Exemplar {
        label: label_pairs(exemplar.labels(), None),
        value: Some(exemplar.value()),
        timestamp: exemplar.timestamp_millis().map(timestamp),
    }
}

fn timestamp(millis: i64) -> prost_types::Timestamp {
    let (seconds, millis) = (millis.div_euclid(1000), millis.rem_euclid(1000));
    // `millis` is in 0..1000, so the nanoseconds always fit.
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (millis * 1_000_000) as i32;
    prost_types::Timestamp { seconds, nanos }
}
