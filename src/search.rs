//! Semantic search over a user's embedded memories
//!
//! The query is embedded with the same model used on create, then every
//! embedded memory of the user is scored by cosine similarity (exact brute
//! force, no approximate index). Search is all-or-nothing: an embedding or
//! store failure fails the whole call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::embeddings::EmbeddingService;
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::metrics::{self, Timer};
use crate::storage::{run_blocking, MemoryId, ScoredMemory, Store, UserId};
use crate::validation;

const SEARCH_FAILED: &str = "Failed to search memories";

/// One ranked result, in the wire shape clients consume
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: MemoryId,
    pub text: String,
    pub metadata: Option<serde_json::Value>,
    /// Cosine similarity, 1.0 for an identical direction
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

impl From<ScoredMemory> for SearchHit {
    fn from(scored: ScoredMemory) -> Self {
        Self {
            id: scored.memory.id,
            text: scored.memory.content,
            metadata: scored.memory.metadata,
            score: scored.score,
            created_at: scored.memory.created_at,
        }
    }
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn Store>,
    embeddings: EmbeddingService,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Store>, embeddings: EmbeddingService) -> Self {
        Self { store, embeddings }
    }

    /// Rank the user's memories against `query`, best first.
    ///
    /// Memories without an embedding are never returned. Equal scores keep
    /// newest-first order, so identical queries give identical results.
    pub async fn search(
        &self,
        user_id: UserId,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        validation::validate_search_query(query).map_validation_err("query")?;
        let limit = validation::validate_search_limit(limit).map_validation_err("limit")?;

        let _timer = Timer::new(metrics::VECTOR_SEARCH_DURATION.clone());
        let result = self.rank(user_id, query, limit).await;

        match &result {
            Ok(hits) => {
                metrics::VECTOR_SEARCH_TOTAL.with_label_values(&["success"]).inc();
                metrics::VECTOR_SEARCH_RESULTS.observe(hits.len() as f64);
                tracing::debug!(user_id = %user_id, results = hits.len(), "Search completed");
            }
            Err(_) => {
                metrics::VECTOR_SEARCH_TOTAL.with_label_values(&["error"]).inc();
            }
        }
        result
    }

    async fn rank(&self, user_id: UserId, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vector = self
            .embeddings
            .embed(query)
            .await
            .map_err(AppError::embedding(SEARCH_FAILED))?;

        let store = self.store.clone();
        let ranked = run_blocking(move || store.vector_search(&user_id, &query_vector, limit))
            .await
            .map_err(AppError::store(SEARCH_FAILED))?;

        Ok(ranked.into_iter().map(SearchHit::from).collect())
    }
}
