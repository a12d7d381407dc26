//! MemoryHub Library
//!
//! Multi-tenant semantic memory service: accounts hold short text memories,
//! each embedded into a 384-dimension vector and searchable by meaning.
//!
//! # Key Features
//! - API-key authentication with a cached, layered credential lookup
//! - Per-identity rate limiting (sliding or fixed window)
//! - Local embeddings (MiniLM-L6 via ONNX) with a hashing fallback
//! - RocksDB embedded storage (no external database)

pub mod auth;
pub mod config;
pub mod constants;
pub mod embeddings;
pub mod errors;
pub mod handlers;
pub mod memory;
pub mod metrics;
pub mod middleware;
pub mod ratelimit;
pub mod search;
pub mod similarity;
pub mod storage;
pub mod tracing_setup;
pub mod validation;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
