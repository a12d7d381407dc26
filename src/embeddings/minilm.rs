//! MiniLM-L6-v2 embedding model using ONNX Runtime
//!
//! Generates 384-dimensional sentence embeddings optimized for semantic similarity.
//! Model: sentence-transformers/all-MiniLM-L6-v2
//!
//! The ONNX session and tokenizer are loaded on first use through a
//! single-flight [`ModelSlot`] unless eager loading is configured.

use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokenizers::Tokenizer;

use super::lazy::ModelSlot;
use super::{normalize, Embedder, EmbeddingConfig, EmbeddingError};
use crate::constants::EMBEDDING_DIMENSION;

/// Loaded ONNX session and tokenizer
struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LoadedModel {
    fn load(files: &ModelFiles, threads: usize) -> Result<Self, EmbeddingError> {
        tracing::info!(
            "Loading MiniLM-L6-v2 model from {:?} with {} threads",
            files.model,
            threads
        );

        let session = Session::builder()
            .map_err(|e| EmbeddingError::ModelLoad(format!("onnx session builder: {e}")))?
            .with_intra_threads(threads)
            .map_err(|e| EmbeddingError::ModelLoad(format!("onnx intra threads: {e}")))?
            .commit_from_file(&files.model)
            .map_err(|e| EmbeddingError::ModelLoad(format!("onnx model: {e}")))?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EmbeddingError::ModelLoad(format!("tokenizer: {e}")))?;

        tracing::info!("MiniLM-L6-v2 model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

/// Resolved model and tokenizer paths
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    /// Locate model files in `dir`, preferring the quantized export
    pub fn locate(dir: &std::path::Path) -> Option<Self> {
        let tokenizer = dir.join("tokenizer.json");
        if !tokenizer.exists() {
            return None;
        }
        ["model_quantized.onnx", "model.onnx"]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .map(|model| Self { model, tokenizer })
    }
}

/// MiniLM-L6-v2 embedder with ONNX Runtime
pub struct MiniLmEmbedder {
    files: ModelFiles,
    threads: usize,
    max_tokens: usize,
    slot: ModelSlot<LoadedModel>,
}

impl MiniLmEmbedder {
    pub fn new(files: ModelFiles, config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let embedder = Self {
            files,
            threads: config.onnx_threads,
            max_tokens: config.max_tokens,
            slot: ModelSlot::new(),
        };

        if config.lazy_load {
            tracing::info!("Lazy loading enabled - model will load on first embed()");
        } else {
            tracing::info!("Eager loading ONNX model");
            embedder.model()?;
        }

        Ok(embedder)
    }

    fn model(&self) -> Result<std::sync::Arc<LoadedModel>, EmbeddingError> {
        self.slot
            .get_or_init(|| LoadedModel::load(&self.files, self.threads))
    }

    fn run_inference(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let model = self.model()?;

        let encoding = model
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenization(e.to_string()))?;

        let seq_len = encoding.get_ids().len().min(self.max_tokens);
        if seq_len == 0 {
            return Err(EmbeddingError::Tokenization("no tokens produced".to_string()));
        }

        let input_ids: Vec<i64> = encoding.get_ids()[..seq_len]
            .iter()
            .map(|&id| id as i64)
            .collect();
        let attention: Vec<i64> = encoding.get_attention_mask()[..seq_len]
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids = vec![0i64; seq_len];

        let input_ids_value = Tensor::from_array((vec![1, seq_len], input_ids)).map_err(inference_error)?;
        let attention_mask_value =
            Tensor::from_array((vec![1, seq_len], attention.clone())).map_err(inference_error)?;
        let token_type_ids_value =
            Tensor::from_array((vec![1, seq_len], token_type_ids)).map_err(inference_error)?;

        let mut session = model.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => &input_ids_value,
                "attention_mask" => &attention_mask_value,
                "token_type_ids" => &token_type_ids_value,
            ])
            .map_err(inference_error)?;

        let (_shape, hidden) = outputs[0].try_extract_tensor::<f32>().map_err(inference_error)?;
        if hidden.len() < seq_len * EMBEDDING_DIMENSION {
            return Err(EmbeddingError::DimensionMismatch {
                expected: seq_len * EMBEDDING_DIMENSION,
                actual: hidden.len(),
            });
        }

        let mut pooled = mean_pool(hidden, &attention, EMBEDDING_DIMENSION);
        normalize(&mut pooled)?;
        Ok(pooled)
    }
}

fn inference_error(e: impl std::fmt::Display) -> EmbeddingError {
    EmbeddingError::Inference(e.to_string())
}

/// Attention-masked mean over the sequence axis of a `[1, seq, dim]` tensor
fn mean_pool(hidden: &[f32], attention: &[i64], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0; dim];
    let mut mask_sum = 0.0;

    for (seq_idx, &att) in attention.iter().enumerate() {
        if att == 1 {
            let row = &hidden[seq_idx * dim..(seq_idx + 1) * dim];
            for (acc, val) in pooled.iter_mut().zip(row) {
                *acc += val;
            }
            mask_sum += 1.0;
        }
    }

    if mask_sum > 0.0 {
        for val in &mut pooled {
            *val /= mask_sum;
        }
    }
    pooled
}

impl Embedder for MiniLmEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        self.run_inference(text)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }

    fn is_ready(&self) -> bool {
        self.slot.is_loaded()
    }
}
