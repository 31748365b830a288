//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how it is
//! rendered as an HTTP response.

use crate::config::ConfigError;
use attendance_core::ports::PortError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The JSON body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    /// Stable machine-readable kind, e.g. `expired` or `not_enrolled`.
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Port(port) => match port {
                PortError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
                PortError::Authorization(_) => (StatusCode::FORBIDDEN, "forbidden"),
                PortError::InvalidCode(_) => (StatusCode::BAD_REQUEST, "invalid_code"),
                PortError::Expired { .. } => (StatusCode::GONE, "expired"),
                PortError::NotEnrolled => (StatusCode::FORBIDDEN, "not_enrolled"),
                PortError::DuplicateScan { .. } => (StatusCode::CONFLICT, "duplicate_scan"),
                PortError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                PortError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
                PortError::Unexpected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            },
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "An internal error occurred".to_string()
        } else {
            match &self {
                ApiError::Port(port) => port.to_string(),
                other => other.to_string(),
            }
        };

        let body = ErrorBody {
            success: false,
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Shorthand for handlers that reject a request as malformed.
pub fn invalid_input(message: impl Into<String>) -> ApiError {
    ApiError::Port(PortError::InvalidInput(message.into()))
}
