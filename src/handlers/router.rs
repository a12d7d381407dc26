//! Router Configuration - Centralized route definitions
//!
//! Routes are split into public (no auth) and protected (credential
//! required, rate limited per user).

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use super::state::MemoryHub;
use super::{health, keys, memory, search};
use crate::auth::auth_middleware;

/// Application state type alias
pub type AppState = Arc<MemoryHub>;

/// Build the public routes (no authentication required)
///
/// These routes must always be accessible for:
/// - Health checks (Kubernetes probes)
/// - Metrics (Prometheus scraping)
/// - Registration (the caller has no credential yet)
pub fn build_public_routes(state: AppState) -> Router {
    Router::new()
        // =================================================================
        // HEALTH & KUBERNETES PROBES
        // =================================================================
        .route("/health", get(health::health))
        .route("/health/live", get(health::health_live))
        .route("/health/ready", get(health::health_ready))
        .route("/api/status", get(health::service_status))
        // =================================================================
        // METRICS (PROMETHEUS)
        // =================================================================
        .route("/metrics", get(health::metrics_endpoint))
        // =================================================================
        // REGISTRATION
        // =================================================================
        .route("/api/auth/register", post(keys::register))
        .with_state(state)
}

/// Build the protected API routes (authentication required)
///
/// Every request passes the credential resolver, which also applies the
/// per-user rate limit, before reaching a handler.
pub fn build_protected_routes(state: AppState) -> Router {
    Router::new()
        // =================================================================
        // MEMORY CRUD OPERATIONS
        // =================================================================
        .route("/api/memory", post(memory::create_memory))
        .route("/api/memory/list", get(memory::list_memories))
        .route("/api/memory/stats", get(memory::memory_stats))
        .route("/api/memory/{memory_id}", delete(memory::delete_memory))
        // =================================================================
        // SEARCH
        // =================================================================
        .route("/api/memory/search", post(search::search_memories))
        // =================================================================
        // CREDENTIALS
        // =================================================================
        .route("/api/keys/regenerate", post(keys::regenerate_key))
        .route_layer(middleware::from_fn_with_state(
            state.resolver().clone(),
            auth_middleware,
        ))
        .with_state(state)
}

/// Build the complete router with both public and protected routes
///
/// Note: global layers (metrics, concurrency limit, timeout, CORS) are
/// applied by the caller.
pub fn build_router(state: AppState) -> Router {
    let public = build_public_routes(state.clone());
    let protected = build_protected_routes(state);

    Router::new().merge(public).merge(protected)
}
