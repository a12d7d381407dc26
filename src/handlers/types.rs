//! Request and response bodies of the REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::SearchHit;
use crate::storage::{Memory, MemoryId, MemoryStats, User, UserId};

// =============================================================================
// MEMORY
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMemoryResponse {
    pub id: MemoryId,
    /// False when the memory was stored without an embedding
    pub embedded: bool,
    pub created_at: DateTime<Utc>,
}

/// A memory as returned by listings
#[derive(Debug, Serialize)]
pub struct MemoryView {
    pub id: MemoryId,
    pub content: String,
    pub project: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<Memory> for MemoryView {
    fn from(memory: Memory) -> Self {
        Self {
            id: memory.id,
            content: memory.content,
            project: memory.project,
            metadata: memory.metadata,
            created_at: memory.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ListMemoriesResponse {
    pub memories: Vec<MemoryView>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct DeleteMemoryResponse {
    pub message: String,
    pub id: MemoryId,
}

#[derive(Debug, Serialize)]
pub struct ProjectStat {
    pub project: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct MemoryStatsResponse {
    pub total_memories: usize,
    pub embedded_memories: usize,
    pub projects: Vec<ProjectStat>,
    pub oldest_memory_at: Option<DateTime<Utc>>,
    pub newest_memory_at: Option<DateTime<Utc>>,
    pub estimated_storage_bytes: u64,
    pub user_id: UserId,
    pub email: String,
    pub account_created_at: DateTime<Utc>,
}

impl MemoryStatsResponse {
    pub fn new(stats: MemoryStats, user: &User) -> Self {
        Self {
            total_memories: stats.total,
            embedded_memories: stats.embedded,
            projects: stats
                .projects
                .into_iter()
                .map(|p| ProjectStat {
                    project: p.project.unwrap_or_else(|| "default".to_string()),
                    count: p.count,
                })
                .collect(),
            oldest_memory_at: stats.oldest,
            newest_memory_at: stats.newest,
            estimated_storage_bytes: stats.estimated_storage_bytes,
            user_id: user.id,
            email: user.email.clone(),
            account_created_at: user.created_at,
        }
    }
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub memories: Vec<SearchHit>,
}

// =============================================================================
// ACCOUNTS AND CREDENTIALS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RegisteredUser {
    pub id: UserId,
    pub email: String,
    /// Shown exactly once; only its hash is kept
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: RegisteredUser,
}

#[derive(Debug, Serialize)]
pub struct RegenerateKeyResponse {
    pub api_key: String,
    pub user_id: UserId,
}

// =============================================================================
// HEALTH
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ComponentCheck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentCheck {
    pub fn healthy(backend: Option<&str>) -> Self {
        Self {
            status: "healthy".to_string(),
            backend: backend.map(str::to_string),
            error: None,
        }
    }

    pub fn with_status(status: &str, backend: &str) -> Self {
        Self {
            status: status.to_string(),
            backend: Some(backend.to_string()),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_string(),
            backend: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusChecks {
    pub store: ComponentCheck,
    pub embedder: ComponentCheck,
    pub credential_cache: ComponentCheck,
    pub rate_limiter: ComponentCheck,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: StatusChecks,
}
