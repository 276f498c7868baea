//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::providers::ProviderError;

/// Application-level error types
///
/// All errors that can occur in the application are represented by this enum.
/// Each variant implements automatic conversion to HTTP responses via `IntoResponse`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request body is malformed or empty
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Credential is missing or could not be verified
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credential is valid but the resource belongs to someone else
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Conversation was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conversation store I/O failed
    #[error("Persistence failed: {0}")]
    PersistFailed(#[source] sqlx::Error),

    /// Model identifier is malformed or has no registered provider
    #[error("Unsupported provider for model: {0}")]
    UnsupportedProvider(String),

    /// The provider call failed (transport, non-2xx status or malformed reply)
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::PersistFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::UnsupportedProvider(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Provider(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
