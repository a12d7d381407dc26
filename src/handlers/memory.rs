//! Memory CRUD handlers: create, list, delete, stats

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};

use super::router::AppState;
use super::types::{
    CreateMemoryResponse, DeleteMemoryResponse, ListMemoriesResponse, MemoryStatsResponse,
    MemoryView, Pagination,
};
use super::utils::json_body;
use crate::auth::AuthenticatedUser;
use crate::errors::AppError;
use crate::memory::{CreateMemory, ListQuery};

/// POST /api/memory - Store a memory
#[tracing::instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn create_memory(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateMemory>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateMemoryResponse>), AppError> {
    let request = json_body(payload)?;
    let created = state.memories().create(auth.user.id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMemoryResponse {
            id: created.memory.id,
            embedded: created.embedded,
            created_at: created.memory.created_at,
        }),
    ))
}

/// GET /api/memory/list?project=&limit=&offset=
#[tracing::instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn list_memories(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListMemoriesResponse>, AppError> {
    let listed = state.memories().list(auth.user.id, &query).await?;
    let has_more = listed.has_more();

    Ok(Json(ListMemoriesResponse {
        pagination: Pagination {
            total: listed.page.total,
            limit: listed.limit,
            offset: listed.offset,
            has_more,
        },
        memories: listed.page.memories.into_iter().map(MemoryView::from).collect(),
    }))
}

/// DELETE /api/memory/{memory_id}
#[tracing::instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn delete_memory(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(memory_id): Path<String>,
) -> Result<Json<DeleteMemoryResponse>, AppError> {
    let id = state.memories().delete(auth.user.id, &memory_id).await?;

    Ok(Json(DeleteMemoryResponse {
        message: "Memory deleted successfully".to_string(),
        id,
    }))
}

/// GET /api/memory/stats
#[tracing::instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn memory_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MemoryStatsResponse>, AppError> {
    let stats = state.memories().stats(auth.user.id).await?;
    Ok(Json(MemoryStatsResponse::new(stats, &auth.user)))
}
