//! Account registration and credential regeneration

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    Extension,
};

use super::router::AppState;
use super::types::{RegenerateKeyResponse, RegisterRequest, RegisterResponse, RegisteredUser};
use super::utils::json_body;
use crate::auth::AuthenticatedUser;
use crate::errors::{AppError, ValidationErrorExt};
use crate::storage::StoreError;
use crate::validation;

/// POST /api/auth/register - Create an account and issue its first API key
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let request = json_body(payload)?;
    let email = validation::validate_email(&request.email).map_validation_err("email")?;

    let (user, api_key) = state
        .resolver()
        .register(email)
        .await
        .map_err(|e| match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::store("Failed to register user")(other),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user: RegisteredUser {
                id: user.id,
                email: user.email,
                api_key,
            },
        }),
    ))
}

/// POST /api/keys/regenerate - Replace the caller's API key
///
/// The presented key stops working as soon as this returns.
#[tracing::instrument(skip_all, fields(user_id = %auth.user.id))]
pub async fn regenerate_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<RegenerateKeyResponse>, AppError> {
    let (user, api_key) = state
        .resolver()
        .regenerate(auth.user.id, Some(&auth.cache_key))
        .await
        .map_err(AppError::store("Failed to regenerate API key"))?;

    Ok(Json(RegenerateKeyResponse {
        api_key,
        user_id: user.id,
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::*;
    use crate::auth::credential::is_well_formed;
    use axum::http::{header, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_register() {
        let h = TestHarness::new();
        let (status, body) = send(
            h.router(),
            post_json("/api/auth/register", None, &json!({"email": "  Alice@Example.com "})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User registered successfully");
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert!(is_well_formed(body["user"]["api_key"].as_str().unwrap()));

        let (status, body) = send(
            h.router(),
            post_json("/api/auth/register", None, &json!({"email": "alice@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "User with this email already exists");

        let (status, _) = send(
            h.router(),
            post_json("/api/auth/register", None, &json!({"email": "not-an-email"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_protected_routes_require_credential() {
        let h = TestHarness::new();

        let (status, body) = send(h.router(), get("/api/memory/list", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Missing authorization header");

        let (status, body) = send(h.router(), get("/api/memory/list", Some("mh_unknown"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid API key");
    }

    #[tokio::test]
    async fn test_bare_token_is_accepted() {
        let h = TestHarness::new();
        let key = h.register("alice@example.com").await;

        let request = axum::http::Request::builder()
            .uri("/api/memory/list")
            .header(header::AUTHORIZATION, key.as_str())
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, _) = send(h.router(), request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_key_immediately() {
        let h = TestHarness::new();
        let old_key = h.register("alice@example.com").await;

        // Warm the credential cache
        let (status, _) = send(h.router(), get("/api/memory/list", Some(&old_key))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            h.router(),
            post_json("/api/keys/regenerate", Some(&old_key), &json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let new_key = body["api_key"].as_str().unwrap().to_string();
        assert_ne!(new_key, old_key);

        let (status, _) = send(h.router(), get("/api/memory/list", Some(&old_key))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(h.router(), get("/api/memory/list", Some(&new_key))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_boundary() {
        let h = TestHarness::with(std::sync::Arc::new(crate::embeddings::HashingEmbedder::new()), 100);
        let key = h.register("alice@example.com").await;
        let app = h.router();

        for i in 0..100 {
            let resp = app
                .clone()
                .oneshot(get("/api/memory/list", Some(&key)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "request {}", i + 1);
        }

        let resp = app.oneshot(get("/api/memory/list", Some(&key))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = resp.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
    }
}
