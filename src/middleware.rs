//! HTTP request tracking middleware for observability

use axum::{extract::Request, middleware::Next, response::Response};
use prometheus::IntGauge;
use std::time::Instant;

/// Holds one slot of an in-flight gauge; released on drop, so a request
/// cancelled by an outer timeout still gives its slot back
pub struct InFlight {
    gauge: IntGauge,
}

impl InFlight {
    pub fn enter(gauge: IntGauge) -> Self {
        gauge.inc();
        Self { gauge }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Middleware to track HTTP request latency and counts
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let normalized_path = normalize_path(req.uri().path());

    let in_flight = InFlight::enter(crate::metrics::CONCURRENT_REQUESTS.clone());
    let response = next.run(req).await;
    drop(in_flight);

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    crate::metrics::HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &normalized_path, &status])
        .observe(duration);

    crate::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &normalized_path, &status])
        .inc();

    response
}

/// Normalize path to prevent metric cardinality explosion
/// /api/memory/550e8400-e29b-41d4-a716-446655440000 -> /api/memory/{id}
pub fn normalize_path(path: &str) -> String {
    let normalized: Vec<&str> = path
        .split('/')
        .filter(|part| !part.is_empty())
        .map(|part| if is_id(part) { "{id}" } else { part })
        .collect();

    format!("/{}", normalized.join("/"))
}

/// Check if a path segment looks like an ID (UUID, numeric, long token)
fn is_id(segment: &str) -> bool {
    // UUID pattern
    if segment.contains('-') && segment.len() >= 32 {
        return true;
    }

    // Numeric ID
    if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Hashes, credentials, other long opaque tokens
    segment.len() > 20
}
