//! Domain records shared by the store, the services and the HTTP layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque user identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque memory identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An account and its credential material
///
/// `api_key` is the legacy plaintext credential, kept only for accounts that
/// predate hashed storage (or when legacy mode is configured). `api_key_hash`
/// is either the canonical SHA-256 hex digest or a salted bcrypt hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub api_key: Option<String>,
    pub api_key_hash: Option<String>,
    /// Incremented every time the credential is regenerated
    pub credential_version: u64,
    pub created_at: DateTime<Utc>,
}

/// Credential fields written on issuance or regeneration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialMaterial {
    pub plaintext: Option<String>,
    pub hash: Option<String>,
    pub version: u64,
}

/// Input for a memory insert; validated by the caller
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub user_id: UserId,
    pub project: Option<String>,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// A stored memory. The embedding itself is never loaded into this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub id: MemoryId,
    pub user_id: UserId,
    pub project: Option<String>,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
}

/// One page of a listing plus the total count of matching memories
#[derive(Debug, Clone, Default)]
pub struct MemoryPage {
    pub memories: Vec<Memory>,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// Cosine similarity, `1 - cosine_distance`
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectCount {
    pub project: Option<String>,
    pub count: usize,
}

/// Aggregate view of a user's memories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    pub total: usize,
    pub embedded: usize,
    pub projects: Vec<ProjectCount>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub estimated_storage_bytes: u64,
}
