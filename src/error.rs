use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::responses::{ApiResponse, ErrorResponse};

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key-value store '{0}' is not registered")]
    StoreNotFound(String),

    /// The store holds a combination of sub-records that no writer produces.
    #[error("Idempotency store inconsistency: {0}")]
    Consistency(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::StoreNotFound(_)
            | AppError::Consistency(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Redis(_) => "STORE_UNAVAILABLE",
            AppError::Config(_) => "CONFIGURATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::StoreNotFound(_) => "STORE_NOT_FOUND",
            AppError::Consistency(_) => "STORE_INCONSISTENT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Request failed: {}", self);
        }

        // Internal details stay in the logs.
        let message = match &self {
            AppError::Validation(msg) => msg.clone(),
            _ => "An internal error occurred".to_string(),
        };

        let body = ApiResponse::<()>::error(ErrorResponse::new(self.code(), message));
        (status, Json(body)).into_response()
    }
}
