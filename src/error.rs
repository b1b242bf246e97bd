use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::CoordinateError;

/// Errors returned by the matching, tracking and pricing services.
///
/// `NotFound`, `InvalidState`, `Validation` and `Conflict` are caller-visible
/// contract violations. `ExternalService` covers geo-index, flag and event-bus
/// failures; `Storage` wraps the record store.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("External service error: {0}")]
    ExternalService(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl From<CoordinateError> for DispatchError {
    fn from(err: CoordinateError) -> Self {
        DispatchError::Validation(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(msg) => AppError::NotFound(msg),
            DispatchError::Validation(msg) => AppError::BadRequest(msg),
            DispatchError::InvalidState(msg) | DispatchError::Conflict(msg) => {
                AppError::Conflict(msg)
            }
            DispatchError::ExternalService(msg) => AppError::Unavailable(msg),
            DispatchError::Storage(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
