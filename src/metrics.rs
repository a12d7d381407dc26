//! Metrics with Prometheus
//!
//! Exposes key operational metrics for monitoring and alerting:
//! - Request rates and latencies
//! - Embedding generation and vector search performance
//! - Credential resolution paths and rate-limit decisions
//! - Error rates by code
//!
//! NOTE: No user_id or credential material in labels. User counts are
//! unbounded and credentials are secrets.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Request Metrics
    // ============================================================================

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "memoryhub_http_request_duration_seconds",
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Total HTTP requests
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_http_requests_total", "Total HTTP requests"),
        &["method", "endpoint", "status"]
    ).unwrap();

    /// Current in-flight requests
    pub static ref CONCURRENT_REQUESTS: IntGauge = IntGauge::new(
        "memoryhub_concurrent_requests",
        "Current number of concurrent requests"
    ).unwrap();

    // ============================================================================
    // Memory Operation Metrics
    // ============================================================================

    /// Memory operations by kind and outcome
    pub static ref MEMORY_OPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_memory_ops_total", "Total memory operations"),
        &["operation", "result"]  // operation: "create", "list", "delete", "stats"
    ).unwrap();

    /// Memory operation duration
    pub static ref MEMORY_OPS_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "memoryhub_memory_ops_duration_seconds",
            "Memory operation duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation"]
    ).unwrap();

    // ============================================================================
    // Embedding Metrics
    // ============================================================================

    /// Embedding generation operations
    pub static ref EMBEDDING_GENERATE_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_embedding_generate_total", "Total embedding generations"),
        &["mode", "result"]  // mode: "onnx" or "hashing"
    ).unwrap();

    /// Embedding generation duration
    pub static ref EMBEDDING_GENERATE_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "memoryhub_embedding_generate_duration_seconds",
            "Embedding generation duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["mode"]
    ).unwrap();

    // ============================================================================
    // Search Metrics
    // ============================================================================

    /// Semantic searches by outcome
    pub static ref VECTOR_SEARCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_vector_search_total", "Total vector search operations"),
        &["result"]
    ).unwrap();

    /// End-to-end search duration (embedding plus ranking)
    pub static ref VECTOR_SEARCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "memoryhub_vector_search_duration_seconds",
            "Vector search duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).unwrap();

    /// Results returned per search
    pub static ref VECTOR_SEARCH_RESULTS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "memoryhub_vector_search_results",
            "Number of results returned per search"
        )
        .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0])
    ).unwrap();

    // ============================================================================
    // Auth Metrics
    // ============================================================================

    /// Credential resolutions by path and outcome
    pub static ref AUTH_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_auth_resolutions_total", "Credential resolutions"),
        &["path", "result"]  // path: "cache", "plaintext", "canonical_hash", "salted_scan"
    ).unwrap();

    /// Rate limiter decisions
    pub static ref RATE_LIMIT_DECISIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_rate_limit_decisions_total", "Rate limiter decisions"),
        &["result"]  // "allowed", "limited", "fail_open"
    ).unwrap();

    // ============================================================================
    // Error Metrics
    // ============================================================================

    /// Internal errors by code
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("memoryhub_errors_total", "Total internal errors by code"),
        &["code"]
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    // Request metrics
    METRICS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(CONCURRENT_REQUESTS.clone()))?;

    // Memory operation metrics
    METRICS_REGISTRY.register(Box::new(MEMORY_OPS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(MEMORY_OPS_DURATION.clone()))?;

    // Embedding metrics
    METRICS_REGISTRY.register(Box::new(EMBEDDING_GENERATE_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(EMBEDDING_GENERATE_DURATION.clone()))?;

    // Search metrics
    METRICS_REGISTRY.register(Box::new(VECTOR_SEARCH_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(VECTOR_SEARCH_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(VECTOR_SEARCH_RESULTS.clone()))?;

    // Auth metrics
    METRICS_REGISTRY.register(Box::new(AUTH_RESOLUTIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(RATE_LIMIT_DECISIONS_TOTAL.clone()))?;

    // Error metrics
    METRICS_REGISTRY.register(Box::new(ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Render the registry in Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Helper to time operations with histogram (RAII pattern)
/// Usage: let _timer = Timer::new(SOME_HISTOGRAM.clone());
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_observes_on_drop() {
        let histogram = Histogram::with_opts(HistogramOpts::new("t", "t")).unwrap();
        {
            let _timer = Timer::new(histogram.clone());
        }
        assert_eq!(histogram.get_sample_count(), 1);
    }
}
