//! Shared application state
//!
//! [`MemoryHub`] wires the store, the embedder, the credential resolver and
//! the memory/search services together. One instance per process, shared
//! behind an `Arc` by every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{CredentialCache, CredentialResolver};
use crate::config::ServerConfig;
use crate::embeddings::{build_embedder, Embedder, EmbeddingService};
use crate::memory::MemoryManager;
use crate::ratelimit::RateLimiter;
use crate::search::SearchEngine;
use crate::storage::{RocksStore, Store, StoreError};

pub struct MemoryHub {
    config: ServerConfig,
    store: Arc<dyn Store>,
    embeddings: EmbeddingService,
    resolver: Arc<CredentialResolver>,
    memories: MemoryManager,
    search: SearchEngine,
}

impl MemoryHub {
    /// Open storage and build every component from configuration
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> =
            Arc::new(RocksStore::open(&config.storage_path, config.write_mode)?);
        let embedder = build_embedder(&config.embedding)?;
        let cache = config.credential_cache.build();
        let limiter = config.rate_limit.build();
        Ok(Self::from_parts(config, store, embedder, cache, limiter))
    }

    /// Assemble from already-built components
    pub fn from_parts(
        config: ServerConfig,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<dyn CredentialCache>,
        limiter: RateLimiter,
    ) -> Self {
        let embeddings = EmbeddingService::new(
            embedder,
            Duration::from_millis(config.embedding.timeout_ms),
        );
        let resolver = Arc::new(CredentialResolver::new(
            store.clone(),
            cache,
            limiter,
            config.resolver_config(),
        ));
        let memories = MemoryManager::new(store.clone(), embeddings.clone());
        let search = SearchEngine::new(store.clone(), embeddings.clone());

        Self {
            config,
            store,
            embeddings,
            resolver,
            memories,
            search,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    pub fn memories(&self) -> &MemoryManager {
        &self.memories
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    /// Flush pending writes; called during graceful shutdown
    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush()
    }
}
