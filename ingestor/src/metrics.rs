use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref TELEMETRY_RECEIVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_telemetry_received_total",
        "Total telemetry submissions received over HTTP"
    ))
    .expect("valid metric definition");
    pub static ref TELEMETRY_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_telemetry_stored_total",
        "Total telemetry records persisted"
    ))
    .expect("valid metric definition");
    pub static ref TELEMETRY_REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_telemetry_rejected_total",
        "Total submissions rejected by validation"
    ))
    .expect("valid metric definition");
    pub static ref NOT_READY_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_not_ready_total",
        "Total requests refused because storage was not ready"
    ))
    .expect("valid metric definition");
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_db_failures_total",
        "Total storage insert or query failures"
    ))
    .expect("valid metric definition");
    pub static ref INSERT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_insert_latency_seconds",
            "Time taken to insert one record"
        )
        .buckets(LATENCY_BUCKETS.to_vec())
    )
    .expect("valid metric definition");
    pub static ref QUERY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_query_latency_seconds",
            "Time taken to read the most recent records"
        )
        .buckets(LATENCY_BUCKETS.to_vec())
    )
    .expect("valid metric definition");
    pub static ref STORAGE_READY: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_storage_ready",
        "1 when the storage connection is ready, 0 otherwise"
    ))
    .expect("valid metric definition");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TELEMETRY_RECEIVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TELEMETRY_STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TELEMETRY_REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOT_READY_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INSERT_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(QUERY_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(STORAGE_READY.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
