//! Health and Infrastructure Handlers
//!
//! Kubernetes probes, service status, and Prometheus metrics.

use axum::{extract::State, http::StatusCode, response::Json};

use super::router::AppState;
use super::types::{ComponentCheck, HealthResponse, StatusChecks, StatusResponse};
use crate::metrics;
use crate::storage::run_blocking;

/// Main health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness probe - indicates if process is alive and not deadlocked
/// Returns 200 OK if service is running (minimal check, always succeeds if reachable)
pub async fn health_live() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Readiness probe - indicates if service can handle traffic
/// Returns 200 OK if the store answers, 503 if not
pub async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let store = state.store().clone();
    match run_blocking(move || store.health_check()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                })),
            )
        }
    }
}

/// GET /api/status - Per-component status
///
/// The store is the only hard dependency: its failure makes the service
/// unhealthy (503). Cache and limiter fail open and are reported only.
pub async fn service_status(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    let store = state.store().clone();
    let store_check = match run_blocking(move || store.health_check()).await {
        Ok(()) => ComponentCheck::healthy(Some("rocksdb")),
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            ComponentCheck::unhealthy("store unreachable")
        }
    };
    let store_ok = store_check.error.is_none();

    let embeddings = state.embeddings();
    let embedder_check = if embeddings.is_ready() {
        ComponentCheck::healthy(Some(embeddings.backend()))
    } else {
        // Lazy model not loaded yet; first request pays the load
        ComponentCheck::with_status("pending", embeddings.backend())
    };

    let resolver = state.resolver();
    let cache_check = match resolver.cache_backend() {
        "disabled" => ComponentCheck::with_status("disabled", "disabled"),
        backend => ComponentCheck::healthy(Some(backend)),
    };
    let limiter_check = match resolver.limiter_backend() {
        "disabled" => ComponentCheck::with_status("disabled", "disabled"),
        backend => ComponentCheck::healthy(Some(backend)),
    };

    let (status_code, status) = if store_ok {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(StatusResponse {
            status: status.to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks: StatusChecks {
                store: store_check,
                embedder: embedder_check,
                credential_cache: cache_check,
                rate_limiter: limiter_check,
            },
        }),
    )
}

/// Prometheus metrics endpoint for observability
pub async fn metrics_endpoint() -> Result<String, StatusCode> {
    metrics::gather_text().map_err(|e| {
        tracing::error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_endpoints() {
        let h = TestHarness::new();

        let (status, body) = send(h.router(), get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        let (status, _) = send(h.router(), get("/health/live", None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(h.router(), get("/health/ready", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_service_status() {
        let h = TestHarness::new();
        let (status, body) = send(h.router(), get("/api/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["store"]["status"], "healthy");
        assert_eq!(body["checks"]["embedder"]["backend"], "hashing");
        assert_eq!(body["checks"]["credential_cache"]["backend"], "moka");
        assert_eq!(body["checks"]["rate_limiter"]["backend"], "sliding_window");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_is_text() {
        let h = TestHarness::new();
        let (status, _) = send(h.router(), get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(h.router(), get("/metrics", None)).await;
        assert_eq!(status, StatusCode::OK);
        let text = body.as_str().expect("metrics are plain text");
        assert!(text.contains("memoryhub_http_requests_total"));
        assert!(text.contains("endpoint=\"/health\""));
        assert!(text.contains("memoryhub_concurrent_requests"));
    }
}
