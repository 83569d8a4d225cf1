use std::sync::Arc;

use prom_exposition::{ExpositionConfig, ExpositionError, ExpositionFormatWriter, ExpositionFormats};
use prom_instrument::naming::sanitize_label_name;
use prom_instrument::snapshot::{CounterPoint, FamilyData, GaugePoint, Metadata, MetricFamily};
use prom_instrument::{
    ArgumentError, Clock, CollectorError, Counter, Exemplar, ExemplarSampler, Gauge, Histogram,
    Info, Labels, MockClock, Registry, Summary, Unit,
};

const TEXT: &str = "text/plain; version=0.0.4";
const OPENMETRICS: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";
const PROTOBUF: &str =
    "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited";

struct TraceSampler;

impl ExemplarSampler for TraceSampler {
    fn sample(&self, value: f64, _: Option<&Exemplar>) -> Option<Exemplar> {
        let labels = Labels::of(&["trace_id"], &["4bf92f3577b34da6"]).ok()?;
        Exemplar::new(value, labels, Some(1_672_850_685_829)).ok()
    }
}

fn clock() -> Arc<dyn Clock> {
    Arc::new(MockClock::new(1_672_850_585_820))
}

fn scrape(registry: &Registry, accept: &str, config: ExpositionConfig) -> (String, bool) {
    let formats = ExpositionFormats::new(config);
    let (snapshots, partial) = registry.collect().into_parts();
    let body = formats.find_writer(Some(accept)).to_bytes(&snapshots).unwrap();
    (String::from_utf8(body).unwrap(), partial)
}

#[test]
fn test_same_name_families_are_merged() {
    let registry = Registry::new();
    let by_method = Arc::new(
        Counter::builder("http_requests_total")
            .help("Total number of HTTP requests.")
            .label_names(["status", "method"])
            .build()
            .unwrap(),
    );
    let by_endpoint = Arc::new(
        Counter::builder("http_requests")
            .label_names(["status", "endpoint"])
            .build()
            .unwrap(),
    );
    registry.register(by_method.clone()).unwrap();
    registry.register(by_endpoint.clone()).unwrap();

    by_method.with_label_values(&["200", "GET"]).unwrap().inc();
    by_endpoint.with_labels(&[("endpoint", "/hello"), ("status", "500")]).unwrap().inc();

    let (text, partial) = scrape(&registry, TEXT, ExpositionConfig::default());
    assert!(!partial);
    assert_eq!(
        text,
        concat!(
            "# HELP http_requests_total Total number of HTTP requests.\n",
            "# TYPE http_requests_total counter\n",
            "http_requests_total{method=\"GET\",status=\"200\"} 1.0\n",
            "http_requests_total{endpoint=\"/hello\",status=\"500\"} 1.0\n",
        )
    );
}

/// Bridges counts kept by a queue backend, named the way the backend names them.
fn backend_jobs() -> Result<Vec<MetricFamily>, CollectorError> {
    let metadata = Metadata::sanitized("jobs.processed_total")
        .map_err(|e| CollectorError::new("backend", e.to_string()))?
        .with_help("Jobs processed, as reported by the backend.");
    let label = sanitize_label_name("queue-name");
    let point = |queue: &str, value: f64| -> Result<CounterPoint, CollectorError> {
        Ok(CounterPoint {
            labels: Labels::of(&[label.as_str()], &[queue])
                .map_err(|e| CollectorError::new("backend", e.to_string()))?,
            value,
            exemplar: None,
            created_millis: None,
            scrape_timestamp_millis: None,
        })
    };
    Ok(vec![MetricFamily::new(
        metadata,
        FamilyData::Counter(vec![point("default", 99.0)?, point("urgent", 7.0)?]),
    )])
}

#[test]
fn test_custom_collector_shares_name_and_labels_with_counter() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let registry = Registry::new();
    let jobs = Arc::new(
        Counter::builder("jobs_processed_total")
            .help("Jobs processed.")
            .label_names(["queue_name"])
            .build()
            .unwrap(),
    );
    registry.register(jobs.clone()).unwrap();
    registry.register(Arc::new(backend_jobs)).unwrap();
    jobs.with_label_values(&["default"]).unwrap().inc_by(3.0);

    // The counter was registered first, so its sample and help text win for the shared label
    // set, and the backend only contributes the label set the counter does not have.
    let (text, partial) = scrape(&registry, TEXT, ExpositionConfig::default());
    assert!(!partial);
    assert_eq!(
        text,
        concat!(
            "# HELP jobs_processed_total Jobs processed.\n",
            "# TYPE jobs_processed_total counter\n",
            "jobs_processed_total{queue_name=\"default\"} 3.0\n",
            "jobs_processed_total{queue_name=\"urgent\"} 7.0\n",
        )
    );
}

#[test]
fn test_custom_collector_with_conflicting_type_is_dropped() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let registry = Registry::new();
    let jobs = Arc::new(Counter::builder("jobs").label_names(["queue"]).build().unwrap());
    registry.register(jobs.clone()).unwrap();
    registry
        .register(Arc::new(|| -> Result<Vec<MetricFamily>, CollectorError> {
            let labels = Labels::of(&["queue"], &["default"])
                .map_err(|e| CollectorError::new("backend", e.to_string()))?;
            Ok(vec![MetricFamily::new(
                Metadata::new("jobs").map_err(|e| CollectorError::new("backend", e.to_string()))?,
                FamilyData::Gauge(vec![GaugePoint {
                    labels,
                    value: 42.0,
                    scrape_timestamp_millis: None,
                }]),
            )])
        }))
        .unwrap();
    jobs.with_label_values(&["default"]).unwrap().inc();

    let scrape = registry.collect();
    assert_eq!(scrape.failures().len(), 1);
    assert_eq!(scrape.failures()[0].collector(), "jobs");
    assert!(scrape.failures()[0].message().contains("gauge"));

    let (text, partial) = scrape_text(scrape);
    assert!(partial);
    assert_eq!(
        text,
        concat!("# TYPE jobs_total counter\n", "jobs_total{queue=\"default\"} 1.0\n")
    );
}

fn scrape_text(scrape: prom_instrument::Scrape) -> (String, bool) {
    let (snapshots, partial) = scrape.into_parts();
    let body = ExpositionFormats::new(ExpositionConfig::default())
        .find_writer(Some(TEXT))
        .to_bytes(&snapshots)
        .unwrap();
    (String::from_utf8(body).unwrap(), partial)
}

#[test]
fn test_reserved_suffixes_are_never_doubled() {
    assert!(matches!(
        Counter::builder("jobs_total_total").build(),
        Err(ArgumentError::ReservedMetricNameSuffix { suffix: "_total", .. })
    ));
    assert!(matches!(
        Gauge::builder("jobs_created").build(),
        Err(ArgumentError::ReservedMetricNameSuffix { suffix: "_created", .. })
    ));
    assert!(matches!(
        Info::builder("build_info_info").build(),
        Err(ArgumentError::ReservedMetricNameSuffix { suffix: "_info", .. })
    ));
    assert!(Metadata::new("latency_bucket").is_err());

    let registry = Registry::new();
    let jobs = Arc::new(Counter::builder("jobs_total").build().unwrap());
    let build = Arc::new(Info::builder("build_info").label_names(["version"]).build().unwrap());
    registry.register(jobs.clone()).unwrap();
    registry.register(build.clone()).unwrap();
    jobs.inc().unwrap();
    build.set(&["1.2.0"]).unwrap();

    let (text, partial) = scrape(&registry, OPENMETRICS, ExpositionConfig::default());
    assert!(!partial);
    assert!(text.contains("jobs_total 1.0\n"));
    assert!(text.contains("build_info{version=\"1.2.0\"} 1\n"));
    assert!(!text.contains("_total_total"));
    assert!(!text.contains("_info_info"));
}

#[test]
fn test_failing_collector_gives_partial_scrape() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let registry = Registry::new();
    let jobs = Arc::new(Counter::builder("jobs").build().unwrap());
    jobs.inc_by(2.0).unwrap();
    registry.register(jobs).unwrap();
    registry
        .register(Arc::new(|| -> Result<Vec<MetricFamily>, CollectorError> {
            Err(CollectorError::new("database", "connection refused"))
        }))
        .unwrap();

    let (text, partial) = scrape(&registry, TEXT, ExpositionConfig::default());
    assert!(partial);
    assert!(text.contains("jobs_total 2.0\n"));
}

#[test]
fn test_openmetrics_end_to_end() {
    let registry = Registry::new();
    let requests = Arc::new(
        Counter::builder("requests")
            .help("Requests served.")
            .clock(clock())
            .exemplar_sampler(Arc::new(TraceSampler))
            .build()
            .unwrap(),
    );
    let latency = Arc::new(
        Histogram::builder("latency_seconds")
            .unit(Unit::seconds())
            .buckets([0.1, 1.0])
            .clock(clock())
            .exemplar_sampler(Arc::new(TraceSampler))
            .build()
            .unwrap(),
    );
    registry.register(requests.clone()).unwrap();
    registry.register(latency.clone()).unwrap();

    requests.inc_with_exemplar(1.0).unwrap();
    latency.observe_with_exemplar(0.5).unwrap();
    latency.observe(5.0).unwrap();

    let config = ExpositionConfig::new().include_created_timestamps(true);
    let (text, _) = scrape(&registry, OPENMETRICS, config);
    assert_eq!(
        text,
        concat!(
            "# TYPE latency_seconds histogram\n",
            "# UNIT latency_seconds seconds\n",
            "latency_seconds_bucket{le=\"0.1\"} 0\n",
            "latency_seconds_bucket{le=\"1.0\"} 1 # {trace_id=\"4bf92f3577b34da6\"} 0.5 1672850685.829\n",
            "latency_seconds_bucket{le=\"+Inf\"} 2\n",
            "latency_seconds_count 2\n",
            "latency_seconds_sum 5.5\n",
            "latency_seconds_created 1672850585.820\n",
            "# TYPE requests counter\n",
            "# HELP requests Requests served.\n",
            "requests_total 1.0 # {trace_id=\"4bf92f3577b34da6\"} 1.0 1672850685.829\n",
            "requests_created 1672850585.820\n",
            "# EOF\n",
        )
    );
}

#[test]
fn test_summary_in_text_format() {
    let registry = Registry::new();
    let latency = Arc::new(
        Summary::builder("rpc_duration_seconds")
            .quantile(0.5, 0.01)
            .clock(clock())
            .build()
            .unwrap(),
    );
    registry.register(latency.clone()).unwrap();
    for value in [1.0, 2.0, 3.0] {
        latency.observe(value).unwrap();
    }

    let (text, _) = scrape(&registry, TEXT, ExpositionConfig::default());
    assert_eq!(
        text,
        concat!(
            "# TYPE rpc_duration_seconds summary\n",
            "rpc_duration_seconds{quantile=\"0.5\"} 2.0\n",
            "rpc_duration_seconds_count 3\n",
            "rpc_duration_seconds_sum 6.0\n",
        )
    );
}

#[test]
fn test_protobuf_unavailable() {
    let registry = Registry::new();
    let queue = Arc::new(Gauge::builder("queue_size").build().unwrap());
    queue.set(3.0).unwrap();
    registry.register(queue).unwrap();
    let (snapshots, _) = registry.collect().into_parts();

    let formats = ExpositionFormats::without_protobuf(ExpositionConfig::default());
    let result = formats.find_writer(Some(PROTOBUF)).to_bytes(&snapshots);
    assert!(matches!(result, Err(ExpositionError::FormatUnavailable(_))));

    for accept in [TEXT, OPENMETRICS] {
        let body = formats.find_writer(Some(accept)).to_bytes(&snapshots).unwrap();
        assert!(String::from_utf8(body).unwrap().contains("queue_size 3.0"));
    }
}

#[cfg(feature = "protobuf")]
#[test]
fn test_protobuf_round_trip() {
    use prom_exposition::protobuf::pb;
    use prost::Message;

    let registry = Registry::new();
    let requests =
        Arc::new(Counter::builder("requests").label_names(["method"]).build().unwrap());
    let queue = Arc::new(Gauge::builder("queue_size").help("Queued jobs.").build().unwrap());
    registry.register(requests.clone()).unwrap();
    registry.register(queue.clone()).unwrap();
    requests.with_label_values(&["GET"]).unwrap().inc_by(42.0).unwrap();
    queue.set(0.75).unwrap();

    let formats = ExpositionFormats::default();
    let writer = formats.find_writer(Some(PROTOBUF));
    assert_eq!(writer.content_type(), prom_exposition::PROTOBUF_CONTENT_TYPE);

    let (snapshots, _) = registry.collect().into_parts();
    let bytes = writer.to_bytes(&snapshots).unwrap();
    let mut buffer = bytes.as_slice();
    let queue_pb = pb::MetricFamily::decode_length_delimited(&mut buffer).unwrap();
    let requests_pb = pb::MetricFamily::decode_length_delimited(&mut buffer).unwrap();
    assert!(buffer.is_empty());

    assert_eq!(queue_pb.name.as_deref(), Some("queue_size"));
    assert_eq!(queue_pb.help.as_deref(), Some("Queued jobs."));
    assert_eq!(queue_pb.r#type, Some(pb::MetricType::Gauge as i32));
    assert_eq!(queue_pb.metric[0].gauge.as_ref().unwrap().value, Some(0.75));

    assert_eq!(requests_pb.name.as_deref(), Some("requests_total"));
    assert_eq!(requests_pb.r#type, Some(pb::MetricType::Counter as i32));
    let metric = &requests_pb.metric[0];
    assert_eq!(metric.label[0].name.as_deref(), Some("method"));
    assert_eq!(metric.label[0].value.as_deref(), Some("GET"));
    assert_eq!(metric.counter.as_ref().unwrap().value, Some(42.0));
}
