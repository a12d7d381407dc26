//! Configuration management for the memory service
//!
//! All configurable parameters in one place with environment variable overrides.
//! Follows the principle: sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth::{CredentialCache, MokaCredentialCache, NoopCredentialCache, ResolverConfig};
use crate::constants::*;
use crate::embeddings::{EmbedderKind, EmbeddingConfig};
use crate::ratelimit::{FixedWindowLimiter, RateLimiter, SlidingWindowLimiter};
use crate::storage::WriteMode;

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all)
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Max age for preflight cache (seconds)
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(), // Empty = allow all origins
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Request-ID".to_string(),
            ],
            max_age_seconds: 86400, // 24 hours
        }
    }
}

impl CorsConfig {
    /// Check if any origin restrictions are configured
    pub fn is_restricted(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    /// Convert to tower-http CorsLayer
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use tower_http::cors::{AllowOrigin, Any, CorsLayer};

        let mut layer = CorsLayer::new();

        if self.allowed_origins.is_empty() {
            layer = layer.allow_origin(Any);
        } else {
            let mut valid_origins = Vec::new();
            for origin in &self.allowed_origins {
                match origin.parse::<axum::http::HeaderValue>() {
                    Ok(value) => valid_origins.push(value),
                    Err(_) => tracing::warn!("CORS: Invalid origin '{}' - skipping", origin),
                }
            }

            if valid_origins.is_empty() {
                // Never fall back to permissive on a broken allow-list
                tracing::error!(
                    "CORS: All {} configured origin(s) failed to parse. \
                     Rejecting all cross-origin requests. Fix MEMORYHUB_CORS_ORIGINS.",
                    self.allowed_origins.len()
                );
            }
            layer = layer.allow_origin(AllowOrigin::list(valid_origins));
        }

        let methods: Vec<axum::http::Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        layer = if methods.is_empty() {
            layer.allow_methods(Any)
        } else {
            layer.allow_methods(methods)
        };

        let headers: Vec<axum::http::HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = if headers.is_empty() {
            layer.allow_headers(Any)
        } else {
            layer.allow_headers(headers)
        };

        layer.max_age(Duration::from_secs(self.max_age_seconds))
    }
}

/// Rate limiter backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitMode {
    Sliding,
    Fixed,
    Off,
}

impl RateLimitMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sliding" => Some(Self::Sliding),
            "fixed" => Some(Self::Fixed),
            "off" | "disabled" | "none" => Some(Self::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub mode: RateLimitMode,
    pub limit: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            mode: RateLimitMode::Sliding,
            limit: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn build(&self) -> RateLimiter {
        let window = Duration::from_secs(self.window_secs);
        match self.mode {
            RateLimitMode::Sliding => {
                RateLimiter::new(Arc::new(SlidingWindowLimiter::new(self.limit, window)))
            }
            RateLimitMode::Fixed => {
                RateLimiter::new(Arc::new(FixedWindowLimiter::new(self.limit, window)))
            }
            RateLimitMode::Off => RateLimiter::disabled(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialCacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub capacity: u64,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_CREDENTIAL_CACHE_TTL_SECS,
            capacity: DEFAULT_CREDENTIAL_CACHE_CAPACITY,
        }
    }
}

impl CredentialCacheConfig {
    pub fn build(&self) -> Arc<dyn CredentialCache> {
        if self.enabled {
            Arc::new(MokaCredentialCache::new(self.capacity))
        } else {
            tracing::warn!("Credential cache disabled; every request resolves against the store");
            Arc::new(NoopCredentialCache)
        }
    }
}

/// Server configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server host address (default: 127.0.0.1)
    /// Set to 0.0.0.0 for Docker or network-accessible deployments
    pub host: String,

    /// Server port (default: 3040)
    pub port: u16,

    /// Storage path for RocksDB (default: ./memoryhub_data)
    pub storage_path: PathBuf,

    pub write_mode: WriteMode,

    /// Maximum concurrent requests (default: 200)
    pub max_concurrent_requests: usize,

    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    /// Whether running in production mode
    pub is_production: bool,

    pub cors: CorsConfig,

    pub rate_limit: RateLimitConfig,

    pub credential_cache: CredentialCacheConfig,

    /// Cap on bcrypt comparisons per unresolved credential (default: 100)
    pub salted_scan_limit: usize,

    /// Also persist newly issued credentials in plaintext (default: false)
    pub legacy_plaintext_keys: bool,

    pub embedding: EmbeddingConfig,

    /// Emit logs as JSON lines instead of human-readable text
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            storage_path: PathBuf::from("./memoryhub_data"),
            write_mode: WriteMode::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            is_production: false,
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            credential_cache: CredentialCacheConfig::default(),
            salted_scan_limit: DEFAULT_SALTED_SCAN_LIMIT,
            legacy_plaintext_keys: false,
            embedding: EmbeddingConfig::default(),
            json_logs: false,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Unparseable values keep
    /// the default and log a warning.
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid {key}={raw}");
                    None
                }
            }
        }

        // Check production mode first
        config.is_production = lookup("MEMORYHUB_ENV")
            .map(|v| {
                let v = v.to_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        if let Some(val) = lookup("MEMORYHUB_HOST") {
            config.host = val;
        }
        if let Some(port) = parsed(&lookup, "MEMORYHUB_PORT") {
            config.port = port;
        }
        if let Some(val) = lookup("MEMORYHUB_DATA_PATH") {
            config.storage_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("MEMORYHUB_WRITE_MODE") {
            match WriteMode::parse(&val) {
                Some(mode) => config.write_mode = mode,
                None => tracing::warn!("Ignoring invalid MEMORYHUB_WRITE_MODE={val}"),
            }
        }

        // Concurrency and timeouts
        if let Some(n) = parsed(&lookup, "MEMORYHUB_MAX_CONCURRENT") {
            config.max_concurrent_requests = n;
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_REQUEST_TIMEOUT") {
            config.request_timeout_secs = n;
        }

        // CORS
        if let Some(origins) = lookup("MEMORYHUB_CORS_ORIGINS") {
            config.cors.allowed_origins = split_list(&origins);
        }
        if config.is_production && !config.cors.is_restricted() {
            tracing::warn!(
                "PRODUCTION WARNING: CORS allows all origins. Set MEMORYHUB_CORS_ORIGINS for security."
            );
        }

        // Rate limiting
        if let Some(val) = lookup("MEMORYHUB_RATE_LIMIT_MODE") {
            match RateLimitMode::parse(&val) {
                Some(mode) => config.rate_limit.mode = mode,
                None => tracing::warn!("Ignoring invalid MEMORYHUB_RATE_LIMIT_MODE={val}"),
            }
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_RATE_LIMIT") {
            config.rate_limit.limit = n;
        }
        if let Some(n) = parsed::<u64>(&lookup, "MEMORYHUB_RATE_WINDOW_SECS") {
            config.rate_limit.window_secs = n.max(1);
        }

        // Credentials
        if let Some(val) = lookup("MEMORYHUB_CREDENTIAL_CACHE") {
            config.credential_cache.enabled = parse_bool(&val);
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_CREDENTIAL_CACHE_TTL") {
            config.credential_cache.ttl_secs = n;
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_CREDENTIAL_CACHE_CAPACITY") {
            config.credential_cache.capacity = n;
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_SALTED_SCAN_LIMIT") {
            config.salted_scan_limit = n;
        }
        if let Some(val) = lookup("MEMORYHUB_LEGACY_PLAINTEXT_KEYS") {
            config.legacy_plaintext_keys = parse_bool(&val);
        }

        // Embeddings
        if let Some(val) = lookup("MEMORYHUB_EMBEDDER") {
            match EmbedderKind::parse(&val) {
                Some(kind) => config.embedding.kind = kind,
                None => tracing::warn!("Ignoring invalid MEMORYHUB_EMBEDDER={val}"),
            }
        }
        if let Some(val) = lookup("MEMORYHUB_MODEL_PATH") {
            config.embedding.model_dir = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("MEMORYHUB_LAZY_LOAD") {
            config.embedding.lazy_load = parse_bool(&val);
        }
        if let Some(n) = parsed::<usize>(&lookup, "MEMORYHUB_ONNX_THREADS") {
            config.embedding.onnx_threads = n.max(1);
        }
        if let Some(n) = parsed(&lookup, "MEMORYHUB_EMBED_TIMEOUT_MS") {
            config.embedding.timeout_ms = n;
        }

        if let Some(val) = lookup("MEMORYHUB_LOG_FORMAT") {
            config.json_logs = val.trim().eq_ignore_ascii_case("json");
        }

        config
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_ttl: Duration::from_secs(self.credential_cache.ttl_secs),
            salted_scan_limit: self.salted_scan_limit,
            legacy_plaintext: self.legacy_plaintext_keys,
        }
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Bind: {}:{}", self.host, self.port);
        info!("   Storage: {:?} ({:?} writes)", self.storage_path, self.write_mode);
        match self.rate_limit.mode {
            RateLimitMode::Off => info!("   Rate limit: disabled"),
            mode => info!(
                "   Rate limit: {} req / {}s ({:?})",
                self.rate_limit.limit, self.rate_limit.window_secs, mode
            ),
        }
        if self.credential_cache.enabled {
            info!(
                "   Credential cache: ttl {}s, capacity {}",
                self.credential_cache.ttl_secs, self.credential_cache.capacity
            );
        } else {
            info!("   Credential cache: disabled");
        }
        info!("   Salted scan limit: {}", self.salted_scan_limit);
        info!("   Embedder: {:?}", self.embedding.kind);
        info!("   Max concurrent: {}", self.max_concurrent_requests);
        info!("   Request timeout: {}s", self.request_timeout_secs);
        if self.cors.is_restricted() {
            info!("   CORS origins: {:?}", self.cors.allowed_origins);
        } else {
            info!("   CORS: Permissive (all origins allowed)");
        }
    }
}
