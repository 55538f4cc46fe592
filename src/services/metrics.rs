//! Prometheus metrics for revenue-matcher.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

/// Counter for matching runs by outcome.
pub static MATCHING_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_matcher_runs_total",
        "Total number of matching runs",
        &["status"]
    )
    .expect("Failed to register MATCHING_RUNS")
});

/// Histogram for end-to-end run duration.
pub static RUN_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "revenue_matcher_run_duration_seconds",
        "Matching run duration in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    )
    .expect("Failed to register RUN_DURATION")
});

/// Counter for matches found by confidence level.
pub static MATCHES_FOUND: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_matcher_matches_total",
        "Total number of matches found",
        &["confidence"]
    )
    .expect("Failed to register MATCHES_FOUND")
});

/// Counter for persisted matches by destination.
pub static MATCHES_COMMITTED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_matcher_commits_total",
        "Total number of matches persisted",
        &["destination"]
    )
    .expect("Failed to register MATCHES_COMMITTED")
});

/// Counter for semantic review verdicts.
pub static SEMANTIC_VERDICTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_matcher_semantic_verdicts_total",
        "Total number of semantic review verdicts",
        &["verdict"]
    )
    .expect("Failed to register SEMANTIC_VERDICTS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "revenue_matcher_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "revenue_matcher_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&MATCHING_RUNS);
    Lazy::force(&RUN_DURATION);
    Lazy::force(&MATCHES_FOUND);
    Lazy::force(&MATCHES_COMMITTED);
    Lazy::force(&SEMANTIC_VERDICTS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished matching run.
pub fn record_run(status: &str, duration_secs: f64) {
    MATCHING_RUNS.with_label_values(&[status]).inc();
    RUN_DURATION.observe(duration_secs);
}

/// Record a found match.
pub fn record_match_found(confidence: &str) {
    MATCHES_FOUND.with_label_values(&[confidence]).inc();
}

/// Record persisted matches.
pub fn record_commits(destination: &str, count: usize) {
    MATCHES_COMMITTED
        .with_label_values(&[destination])
        .inc_by(count as f64);
}

/// Record a semantic review verdict.
pub fn record_semantic_verdict(verdict: &str) {
    SEMANTIC_VERDICTS.with_label_values(&[verdict]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
