//! Embedding generation module
//!
//! Provides semantic embedding generation for memory storage and search.
//! Uses ONNX Runtime with MiniLM-L6-v2 for 384-dimensional embeddings, or a
//! deterministic feature-hashing embedder when no model is available.
//!
//! # Configuration
//! - `MEMORYHUB_EMBEDDER=minilm|hashing` - Backend selection
//! - `MEMORYHUB_MODEL_PATH=/dir` - Directory holding the ONNX model and tokenizer
//! - `MEMORYHUB_LAZY_LOAD=false` - Load model at startup
//! - `MEMORYHUB_ONNX_THREADS=N` - Set ONNX thread count
//! - `MEMORYHUB_EMBED_TIMEOUT_MS=N` - Per-call timeout

pub mod hashing;
pub mod lazy;
pub mod minilm;

pub use hashing::HashingEmbedder;
pub use lazy::ModelSlot;
pub use minilm::{MiniLmEmbedder, ModelFiles};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::constants::{
    DEFAULT_EMBED_TIMEOUT_MS, DEFAULT_ONNX_THREADS, EMBEDDING_DIMENSION, EMBEDDING_MAX_TOKENS,
};
use crate::metrics;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to load embedding model: {0}")]
    ModelLoad(String),

    #[error("tokenization failed: {0}")]
    Tokenization(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("expected {expected} components, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding is not normalizable (non-finite or zero norm)")]
    NonFinite,

    #[error("embedding timed out after {0}ms")]
    Timeout(u64),

    #[error("embedding task failed: {0}")]
    Task(String),
}

/// Trait for embedding generation
///
/// Implementations are synchronous and may block (model load, inference);
/// async code goes through [`EmbeddingService`].
pub trait Embedder: Send + Sync {
    /// Generate embedding for text
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Batch encode multiple texts (default: sequential)
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    /// Short backend name used in metrics and status output
    fn backend(&self) -> &'static str;

    /// Whether the backend can embed without further initialization
    fn is_ready(&self) -> bool {
        true
    }
}

/// L2-normalize in place. Fails on zero or non-finite norms.
pub fn normalize(vector: &mut [f32]) -> Result<(), EmbeddingError> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(EmbeddingError::NonFinite);
    }
    for val in vector.iter_mut() {
        *val /= norm;
    }
    Ok(())
}

/// Reject anything that is not exactly `EMBEDDING_DIMENSION` finite components,
/// renormalizing away floating-point drift
pub fn check_output(mut vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != EMBEDDING_DIMENSION {
        return Err(EmbeddingError::DimensionMismatch {
            expected: EMBEDDING_DIMENSION,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::NonFinite);
    }
    normalize(&mut vector)?;
    Ok(vector)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    MiniLm,
    Hashing,
}

impl EmbedderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "minilm" | "onnx" => Some(Self::MiniLm),
            "hashing" | "hash" => Some(Self::Hashing),
            _ => None,
        }
    }
}

/// Configuration for the embedding backend
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub kind: EmbedderKind,

    /// Explicit model directory; `None` searches the default locations
    pub model_dir: Option<PathBuf>,

    pub lazy_load: bool,

    pub onnx_threads: usize,

    /// Maximum sequence length (MiniLM default: 256)
    pub max_tokens: usize,

    /// Upper bound on one embed call, including a lazy model load
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::MiniLm,
            model_dir: None,
            lazy_load: true,
            onnx_threads: DEFAULT_ONNX_THREADS,
            max_tokens: EMBEDDING_MAX_TOKENS,
            timeout_ms: DEFAULT_EMBED_TIMEOUT_MS,
        }
    }
}

impl EmbeddingConfig {
    /// Candidate model directories, in search order
    ///
    /// 1. `model_dir` when configured
    /// 2. ./models/minilm-l6 (local)
    /// 3. ../models/minilm-l6 (parent)
    /// 4. <data dir>/memoryhub/models/minilm-l6
    pub fn model_search_path(&self) -> Vec<PathBuf> {
        if let Some(dir) = &self.model_dir {
            return vec![dir.clone()];
        }
        let mut candidates = vec![
            PathBuf::from("./models/minilm-l6"),
            PathBuf::from("../models/minilm-l6"),
        ];
        if let Some(data) = dirs::data_dir() {
            candidates.push(data.join("memoryhub/models/minilm-l6"));
        }
        candidates
    }
}

/// Construct the configured embedder
///
/// A MiniLM configuration without model files on disk degrades to the
/// hashing embedder with a warning, so the service still starts.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.kind {
        EmbedderKind::Hashing => {
            tracing::info!("Using hashing embedder");
            Ok(Arc::new(HashingEmbedder::new()))
        }
        EmbedderKind::MiniLm => {
            let search_path = config.model_search_path();
            match search_path.iter().find_map(|dir| ModelFiles::locate(dir)) {
                Some(files) => Ok(Arc::new(MiniLmEmbedder::new(files, config)?)),
                None => {
                    tracing::warn!(
                        searched = ?search_path,
                        "MiniLM model files not found. Using HASHING embeddings, semantic search will be limited."
                    );
                    Ok(Arc::new(HashingEmbedder::new()))
                }
            }
        }
    }
}

/// Async facade over a blocking [`Embedder`]
///
/// Runs inference on the blocking pool under a timeout and validates every
/// vector before handing it out.
#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn backend(&self) -> &'static str {
        self.embedder.backend()
    }

    pub fn is_ready(&self) -> bool {
        self.embedder.is_ready()
    }

    /// Embed one text into a unit-length 384-dimension vector
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let embedder = self.embedder.clone();
        let text = text.to_string();
        let result = self
            .run(move || embedder.encode(&text).and_then(check_output))
            .await;
        self.record(result.is_ok(), 1);
        result
    }

    /// Embed several texts with the semantics of sequential single calls.
    /// Any failure fails the whole batch.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(String::is_empty) {
            return Err(EmbeddingError::EmptyInput);
        }
        let count = texts.len();
        let embedder = self.embedder.clone();
        let result = self
            .run(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                embedder
                    .encode_batch(&refs)?
                    .into_iter()
                    .map(check_output)
                    .collect()
            })
            .await;
        self.record(result.is_ok(), count);
        result
    }

    async fn run<T, F>(&self, work: F) -> Result<T, EmbeddingError>
    where
        F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let task = tokio::task::spawn_blocking(work);
        let result = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
            Ok(Err(join)) => Err(EmbeddingError::Task(join.to_string())),
            Ok(Ok(result)) => result,
        };
        metrics::EMBEDDING_GENERATE_DURATION
            .with_label_values(&[self.backend()])
            .observe(start.elapsed().as_secs_f64());
        result
    }

    fn record(&self, ok: bool, count: usize) {
        metrics::EMBEDDING_GENERATE_TOTAL
            .with_label_values(&[self.backend(), if ok { "success" } else { "failure" }])
            .inc_by(count as u64);
    }
}
