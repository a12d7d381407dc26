//! Helpers shared by handlers

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::errors::AppError;

/// Unwrap a JSON body, turning axum's rejection into a 400 with our error shape
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::invalid("body", rejection.body_text()))
}
