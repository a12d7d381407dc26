//! Documented constants for the memory service
//!
//! Tunables that are overridable at runtime live in `config.rs`; the values
//! here are either fixed by the wire contract or used as config defaults.

// =============================================================================
// EMBEDDING CONSTANTS
// =============================================================================

/// Output dimension of the sentence embedding model (all-MiniLM-L6-v2)
///
/// Every stored vector and every query vector has exactly this many
/// components. Changing it invalidates all stored embeddings.
pub const EMBEDDING_DIMENSION: usize = 384;

/// Bytes occupied by one stored embedding (f32 components)
pub const EMBEDDING_BYTES: u64 = (EMBEDDING_DIMENSION * std::mem::size_of::<f32>()) as u64;

/// Maximum number of tokens fed to the model per input
///
/// Inputs beyond this are truncated by the tokenizer. MiniLM was trained
/// on sequences of at most 256 word pieces.
pub const EMBEDDING_MAX_TOKENS: usize = 256;

/// Default upper bound on a single embedding call, including lazy model load
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 10_000;

/// Default ONNX intra-op thread count
pub const DEFAULT_ONNX_THREADS: usize = 2;

// =============================================================================
// CREDENTIAL CONSTANTS
// =============================================================================

/// Prefix of every issued credential
pub const CREDENTIAL_PREFIX: &str = "mh_";

/// Random bytes behind an issued credential (rendered as 64 hex chars)
pub const CREDENTIAL_RANDOM_BYTES: usize = 32;

/// Namespace of credential cache keys
///
/// The cache key is this prefix followed by the canonical hash of the
/// presented credential, so raw credentials never become cache keys.
pub const CREDENTIAL_CACHE_PREFIX: &str = "memoryhub:apikey:";

/// Default lifetime of a cached credential mapping
pub const DEFAULT_CREDENTIAL_CACHE_TTL_SECS: u64 = 300;

/// Default capacity of the in-process credential cache
pub const DEFAULT_CREDENTIAL_CACHE_CAPACITY: u64 = 100_000;

/// Default cap on salted-hash candidates compared per resolution
///
/// Accounts beyond this cap whose only credential is a salted hash cannot
/// authenticate until they are rehashed. See DESIGN.md.
pub const DEFAULT_SALTED_SCAN_LIMIT: usize = 100;

// =============================================================================
// RATE LIMITING CONSTANTS
// =============================================================================

/// Default number of requests allowed per identity per window
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default rate limit window
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

// =============================================================================
// SERVER CONSTANTS
// =============================================================================

pub const DEFAULT_PORT: u16 = 3040;

pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 200;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Time allowed for the final store flush during graceful shutdown
pub const SHUTDOWN_FLUSH_TIMEOUT_SECS: u64 = 10;
