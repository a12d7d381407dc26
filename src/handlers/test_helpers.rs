//! Shared test utilities for handler unit tests.
//!
//! Provides a [`TestHarness`] that sets up a [`MemoryHub`] backed by a fresh
//! RocksDB in a temp directory and the hashing embedder, plus helpers for
//! registering accounts, building authenticated requests and reading JSON
//! response bodies.

use std::sync::{Arc, Once};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt; // for oneshot()

use super::router::build_router;
use super::state::MemoryHub;
use crate::auth::MokaCredentialCache;
use crate::config::ServerConfig;
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::middleware::track_metrics;
use crate::ratelimit::{RateLimiter, SlidingWindowLimiter};
use crate::storage::{RocksStore, WriteMode};

static METRICS_INIT: Once = Once::new();

/// The Prometheus registry is process-global; register it exactly once
fn init_metrics() {
    METRICS_INIT.call_once(|| {
        crate::metrics::register_metrics().expect("failed to register metrics");
    });
}

/// A self-contained test environment with its own temp storage.
///
/// Holds `TempDir` so the directory isn't cleaned up until the harness drops.
pub struct TestHarness {
    pub hub: Arc<MemoryHub>,
    pub store: Arc<RocksStore>,
    _temp_dir: TempDir,
}

impl TestHarness {
    /// Harness with the hashing embedder and the default 100/60s limit
    pub fn new() -> Self {
        Self::with(Arc::new(HashingEmbedder::new()), 100)
    }

    pub fn with(embedder: Arc<dyn Embedder>, rate_limit: u32) -> Self {
        init_metrics();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let store = Arc::new(
            RocksStore::open(temp_dir.path(), WriteMode::Async).expect("failed to open store"),
        );
        let config = ServerConfig {
            storage_path: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let limiter = RateLimiter::new(Arc::new(SlidingWindowLimiter::new(
            rate_limit,
            Duration::from_secs(60),
        )));
        let hub = MemoryHub::from_parts(
            config,
            store.clone(),
            embedder,
            Arc::new(MokaCredentialCache::new(1000)),
            limiter,
        );

        Self {
            hub: Arc::new(hub),
            store,
            _temp_dir: temp_dir,
        }
    }

    /// Build the full application router (public + protected routes),
    /// with request metrics tracked the same way main.rs does.
    pub fn router(&self) -> Router {
        build_router(self.hub.clone()).layer(axum::middleware::from_fn(track_metrics))
    }

    /// Register an account through the API and return its API key
    pub async fn register(&self, email: &str) -> String {
        let (status, body) = send(
            self.router(),
            post_json("/api/auth/register", None, &serde_json::json!({ "email": email })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["user"]["api_key"]
            .as_str()
            .expect("api_key in register response")
            .to_string()
    }
}

// ---------- Request builders ----------

fn builder(method: Method, uri: &str, api_key: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder().method(method).uri(uri);
    match api_key {
        Some(key) => builder.header(header::AUTHORIZATION, format!("Bearer {key}")),
        None => builder,
    }
}

/// GET `uri`, authenticated when `api_key` is given
pub fn get(uri: &str, api_key: Option<&str>) -> Request<Body> {
    builder(Method::GET, uri, api_key)
        .body(Body::empty())
        .unwrap()
}

/// POST a JSON body to `uri`
pub fn post_json<T: serde::Serialize>(uri: &str, api_key: Option<&str>, body: &T) -> Request<Body> {
    let json = serde_json::to_string(body).unwrap();
    builder(Method::POST, uri, api_key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap()
}

/// POST a raw body to `uri` (for malformed JSON tests)
pub fn post_raw(uri: &str, api_key: Option<&str>, body: &'static str) -> Request<Body> {
    builder(Method::POST, uri, api_key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

pub fn delete(uri: &str, api_key: Option<&str>) -> Request<Body> {
    builder(Method::DELETE, uri, api_key)
        .body(Body::empty())
        .unwrap()
}

// ---------- Response helpers ----------

/// Send a request through the router and return (status, JSON body).
pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body_bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&body_bytes).to_string())
        })
    };
    (status, json)
}
