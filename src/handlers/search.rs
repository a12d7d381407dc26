//! Semantic search handler

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    Extension,
};

use super::router::AppState;
use super::types::{SearchRequest, SearchResponse};
use super::utils::json_body;
use crate::auth::AuthenticatedUser;
use crate::errors::AppError;

/// POST /api/memory/search - Rank the caller's memories against a query
#[tracing::instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn search_memories(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let request = json_body(payload)?;
    let memories = state
        .search()
        .search(auth.user.id, &request.query, request.limit)
        .await?;

    Ok(Json(SearchResponse {
        query: request.query,
        count: memories.len(),
        memories,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_search_response_shape() {
        let h = TestHarness::new();
        let key = h.register("alice@example.com").await;

        for content in ["Coffee order: flat white", "Meeting notes about the database migration"] {
            send(
                h.router(),
                post_json("/api/memory", Some(&key), &json!({"content": content, "metadata": {"k": 1}})),
            )
            .await;
        }

        let (status, body) = send(
            h.router(),
            post_json(
                "/api/memory/search",
                Some(&key),
                &json!({"query": "Meeting notes about the database migration", "limit": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["query"], "Meeting notes about the database migration");
        assert_eq!(body["count"], 1);
        let hit = &body["memories"][0];
        assert_eq!(hit["text"], "Meeting notes about the database migration");
        assert_eq!(hit["metadata"]["k"], 1);
        assert!(hit["score"].as_f64().unwrap() > 0.99);
        assert!(hit["id"].is_string());
        assert!(hit["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_empty_search_returns_zero() {
        let h = TestHarness::new();
        let key = h.register("alice@example.com").await;

        let (status, body) = send(
            h.router(),
            post_json("/api/memory/search", Some(&key), &json!({"query": "anything"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
        assert_eq!(body["memories"], json!([]));
    }

    #[tokio::test]
    async fn test_search_validation() {
        let h = TestHarness::new();
        let key = h.register("alice@example.com").await;

        let (status, _) = send(
            h.router(),
            post_json("/api/memory/search", Some(&key), &json!({"query": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            h.router(),
            post_json("/api/memory/search", Some(&key), &json!({"query": "x", "limit": 500})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            h.router(),
            post_json("/api/memory/search", Some(&key), &json!({"limit": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
