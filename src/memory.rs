//! Memory lifecycle: create, list, delete and per-user statistics
//!
//! [`MemoryManager`] owns input validation and ownership checks. Storage goes
//! through the [`Store`] trait on the blocking pool; embeddings through
//! [`EmbeddingService`].

use serde::Deserialize;
use std::sync::Arc;

use crate::auth::AuthError;
use crate::embeddings::EmbeddingService;
use crate::errors::{AppError, Result, ValidationErrorExt};
use crate::metrics::{self, Timer};
use crate::storage::{
    run_blocking, Memory, MemoryId, MemoryPage, MemoryStats, NewMemory, Store, UserId,
};
use crate::validation;

/// Body of a create request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateMemory {
    pub content: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Raw listing parameters, exactly as they arrive in the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub project: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedMemory {
    pub memory: Memory,
    /// False when embedding failed and the memory was stored without a vector
    pub embedded: bool,
}

/// A validated page request and its result
#[derive(Debug, Clone)]
pub struct ListedPage {
    pub page: MemoryPage,
    pub limit: usize,
    pub offset: usize,
}

impl ListedPage {
    pub fn has_more(&self) -> bool {
        self.offset + self.limit < self.page.total
    }
}

#[derive(Clone)]
pub struct MemoryManager {
    store: Arc<dyn Store>,
    embeddings: EmbeddingService,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn Store>, embeddings: EmbeddingService) -> Self {
        Self { store, embeddings }
    }

    /// Validate and persist a memory.
    ///
    /// Embedding is best-effort: if the embedder fails, the memory is still
    /// stored with no vector and `embedded` is false. It will appear in
    /// listings but never in search results.
    pub async fn create(&self, user_id: UserId, request: CreateMemory) -> Result<CreatedMemory> {
        let _timer = Timer::new(metrics::MEMORY_OPS_DURATION.with_label_values(&["create"]));

        validation::validate_content(&request.content).map_validation_err("content")?;
        let project = request
            .project
            .as_deref()
            .map(validation::validate_project)
            .transpose()
            .map_validation_err("project")?;
        let metadata = request.metadata.filter(|m| !m.is_null());
        if let Some(metadata) = &metadata {
            validation::validate_metadata(metadata).map_validation_err("metadata")?;
        }

        let embedding = match self.embeddings.embed(&request.content).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Embedding failed, storing memory without vector");
                None
            }
        };
        let embedded = embedding.is_some();

        let new_memory = NewMemory {
            user_id,
            project,
            content: request.content,
            metadata,
        };
        let store = self.store.clone();
        let memory = run_blocking(move || store.create_memory(new_memory, embedding))
            .await
            .inspect_err(|_| Self::record("create", "error"))
            .map_err(AppError::store("Failed to create memory"))?;

        Self::record("create", "success");
        tracing::debug!(memory_id = %memory.id, user_id = %user_id, embedded, "Memory created");
        Ok(CreatedMemory { memory, embedded })
    }

    /// Newest-first page of the user's memories. Bounds are checked before
    /// the store is touched.
    pub async fn list(&self, user_id: UserId, query: &ListQuery) -> Result<ListedPage> {
        let _timer = Timer::new(metrics::MEMORY_OPS_DURATION.with_label_values(&["list"]));

        let limit = validation::validate_list_limit(query.limit.as_deref())
            .map_validation_err("limit")?;
        let offset = validation::validate_list_offset(query.offset.as_deref())
            .map_validation_err("offset")?;
        // An empty project parameter means "no filter"
        let project = match query.project.as_deref() {
            Some(p) if !p.is_empty() => {
                Some(validation::validate_project(p).map_validation_err("project")?)
            }
            _ => None,
        };

        let store = self.store.clone();
        let page = run_blocking(move || {
            store.list_memories(&user_id, project.as_deref(), limit, offset)
        })
        .await
        .inspect_err(|_| Self::record("list", "error"))
        .map_err(AppError::store("Failed to list memories"))?;

        Self::record("list", "success");
        Ok(ListedPage {
            page,
            limit,
            offset,
        })
    }

    /// Delete a memory owned by `user_id`, together with its vector.
    ///
    /// Unknown and unparseable ids are 404; another user's memory is 403.
    pub async fn delete(&self, user_id: UserId, raw_id: &str) -> Result<MemoryId> {
        let _timer = Timer::new(metrics::MEMORY_OPS_DURATION.with_label_values(&["delete"]));

        let id = validation::validate_memory_id(raw_id)
            .map(MemoryId)
            .map_err(|_| AppError::MemoryNotFound(raw_id.to_string()))?;

        let store = self.store.clone();
        let existing = run_blocking(move || store.find_memory(&id))
            .await
            .map_err(AppError::store("Failed to delete memory"))?
            .ok_or_else(|| AppError::MemoryNotFound(raw_id.to_string()))?;

        if existing.user_id != user_id {
            tracing::info!(memory_id = %id, user_id = %user_id, "Rejected delete of foreign memory");
            Self::record("delete", "forbidden");
            return Err(AuthError::Forbidden("Unauthorized to delete this memory".to_string()).into());
        }

        let store = self.store.clone();
        let deleted = run_blocking(move || store.delete_memory(&id))
            .await
            .inspect_err(|_| Self::record("delete", "error"))
            .map_err(AppError::store("Failed to delete memory"))?;

        // Lost a race with a concurrent delete
        if !deleted {
            return Err(AppError::MemoryNotFound(raw_id.to_string()));
        }

        Self::record("delete", "success");
        tracing::debug!(memory_id = %id, user_id = %user_id, "Memory deleted");
        Ok(id)
    }

    pub async fn stats(&self, user_id: UserId) -> Result<MemoryStats> {
        let store = self.store.clone();
        let stats = run_blocking(move || store.memory_stats(&user_id))
            .await
            .inspect_err(|_| Self::record("stats", "error"))
            .map_err(AppError::store("Failed to fetch memory stats"))?;
        Self::record("stats", "success");
        Ok(stats)
    }

    fn record(operation: &str, result: &str) {
        metrics::MEMORY_OPS_TOTAL
            .with_label_values(&[operation, result])
            .inc();
    }
}
