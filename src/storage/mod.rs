//! Durable storage contract
//!
//! The [`Store`] trait is the boundary between the core (credential
//! resolution, memory CRUD, search) and the persistence engine. It is
//! synchronous: async callers go through [`run_blocking`] so RocksDB I/O
//! never stalls the runtime.

pub mod rocks;
pub mod types;

pub use rocks::{RocksStore, WriteMode};
pub use types::*;

use thiserror::Error;

/// Errors raised by the durable store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error("corrupt storage entry: {0}")]
    Corrupt(String),

    /// Unique constraint violated (email, credential, credential hash)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid embedding: expected {expected} dimensions, got {actual}")]
    InvalidVector { expected: usize, actual: usize },

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Durable CRUD plus exact vector search, scoped per user
pub trait Store: Send + Sync {
    // === Users and credentials ===

    fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Exact match on the legacy plaintext credential field
    fn find_user_by_plaintext(&self, credential: &str) -> Result<Option<User>, StoreError>;

    /// Exact match on the credential hash field
    fn find_user_by_hash(&self, hash: &str) -> Result<Option<User>, StoreError>;

    /// Up to `limit` users that have any credential hash stored
    fn find_users_with_hash(&self, limit: usize) -> Result<Vec<User>, StoreError>;

    fn create_user(&self, email: &str, credential: CredentialMaterial) -> Result<User, StoreError>;

    /// Replace both credential fields of a user, keeping the lookup indices in sync
    fn update_user_credential(
        &self,
        id: &UserId,
        credential: CredentialMaterial,
    ) -> Result<User, StoreError>;

    /// Swap the stored hash for `new_hash` only while the user still holds
    /// `expected_hash` at `expected_version`. Returns `None` when the
    /// credential changed in between and nothing was written.
    fn rehash_credential(
        &self,
        id: &UserId,
        expected_hash: &str,
        expected_version: u64,
        new_hash: String,
    ) -> Result<Option<User>, StoreError>;

    // === Memories ===

    /// Persist a memory and, when present, its embedding in one atomic write
    fn create_memory(
        &self,
        memory: NewMemory,
        embedding: Option<Vec<f32>>,
    ) -> Result<Memory, StoreError>;

    fn find_memory(&self, id: &MemoryId) -> Result<Option<Memory>, StoreError>;

    /// Delete a memory together with its embedding. Returns false if absent.
    fn delete_memory(&self, id: &MemoryId) -> Result<bool, StoreError>;

    /// Newest-first page of a user's memories, with the total matching count
    fn list_memories(
        &self,
        user_id: &UserId,
        project: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<MemoryPage, StoreError>;

    /// Rank the user's embedded memories by cosine similarity to `query`
    fn vector_search(
        &self,
        user_id: &UserId,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredMemory>, StoreError>;

    fn memory_stats(&self, user_id: &UserId) -> Result<MemoryStats, StoreError>;

    /// Cheap liveness probe for readiness checks
    fn health_check(&self) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

/// Run a synchronous store call on the blocking pool
pub async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
