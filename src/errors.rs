//! Structured error handling for the HTTP surface
//!
//! Every handler returns [`AppError`]. Client-actionable failures (validation,
//! authentication, ownership) are surfaced verbatim. Internal failures are
//! logged in full under an opaque error id and rendered as a generic
//! operation-level message carrying only that id.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::AuthError;
use crate::embeddings::EmbeddingError;
use crate::storage::StoreError;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Support correlation id, only present on internal failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

/// Application error types with proper categorization
#[derive(Debug)]
pub enum AppError {
    // Authentication / authorization / rate limiting (401, 403, 429, 500)
    Auth(AuthError),

    // Validation Errors (400)
    InvalidInput { field: String, reason: String },

    // Not Found Errors (404)
    MemoryNotFound(String),

    // Conflict Errors (409)
    Conflict(String),

    // Internal Errors (500) - `operation` is the only text the client sees
    Embedding {
        operation: &'static str,
        source: EmbeddingError,
    },
    Store {
        operation: &'static str,
        source: StoreError,
    },
    Internal {
        operation: &'static str,
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Adapter for `map_err` on store calls
    pub fn store(operation: &'static str) -> impl FnOnce(StoreError) -> AppError {
        move |source| AppError::Store { operation, source }
    }

    /// Adapter for `map_err` on embedding calls
    pub fn embedding(operation: &'static str) -> impl FnOnce(EmbeddingError) -> AppError {
        move |source| AppError::Embedding { operation, source }
    }

    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::MemoryNotFound(_) => "MEMORY_NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Store { .. } => "STORAGE_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(e) => e.status_code(),
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::MemoryNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Embedding { .. } | Self::Store { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to clients
    pub fn message(&self) -> String {
        match self {
            Self::Auth(e) => e.message(),
            Self::InvalidInput { field, reason } => format!("{field}: {reason}"),
            Self::MemoryNotFound(_) => "Memory not found".to_string(),
            Self::Conflict(msg) => msg.clone(),
            Self::Embedding { operation, .. }
            | Self::Store { operation, .. }
            | Self::Internal { operation, .. } => operation.to_string(),
        }
    }

    /// Full internal detail, for server-side logs only
    pub fn detail(&self) -> String {
        match self {
            Self::Auth(e) => format!("{e:?}"),
            Self::Embedding { operation, source } => format!("{operation}: {source}"),
            Self::Store { operation, source } => format!("{operation}: {source}"),
            Self::Internal { operation, source } => format!("{operation}: {source:#}"),
            other => other.message(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Convert to structured error response
    pub fn to_response(&self, error_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            error_id,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail())
    }
}

impl std::error::Error for AppError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

/// Generate an opaque support id in the form `ERR-XXXXXXXX`
pub fn generate_error_id() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ERR-{}", hex::encode_upper(bytes))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_id = if self.is_internal() {
            let id = generate_error_id();
            tracing::error!(error_id = %id, code = self.code(), detail = %self.detail(), "request failed");
            crate::metrics::ERRORS_TOTAL
                .with_label_values(&[self.code()])
                .inc();
            Some(id)
        } else {
            None
        };

        let retry_after = match &self {
            Self::Auth(AuthError::RateLimited { retry_after_secs, .. }) => Some(*retry_after_secs),
            _ => None,
        };

        let mut response = (status, Json(self.to_response(error_id))).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Helper trait to convert validation errors
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| AppError::InvalidInput {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using AppError
pub type Result<T> = std::result::Result<T, AppError>;
