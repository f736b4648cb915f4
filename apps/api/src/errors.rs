use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("Monthly analysis quota exhausted ({used}/{limit} for {period})")]
    QuotaExceeded {
        period: String,
        used: u32,
        limit: u32,
    },

    #[error("Analysis provider error: {0}")]
    AnalysisProvider(String),

    #[error("Unrecognized analysis result shape: {0}")]
    UnrecognizedResultShape(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Persistence failures that are logged and swallowed. A request that hits one
/// of these still reports success to its caller.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cache write failed: {0:#}")]
    Cache(anyhow::Error),

    #[error("history write failed: {0:#}")]
    History(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnreadableDocument(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNREADABLE_DOCUMENT",
                format!("The document could not be read: {msg}"),
            ),
            AppError::QuotaExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
                self.to_string(),
            ),
            AppError::AnalysisProvider(msg) => {
                tracing::error!("Analysis provider error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "ANALYSIS_PROVIDER_ERROR",
                    "The grading service failed to analyze the document".to_string(),
                )
            }
            AppError::UnrecognizedResultShape(msg) => {
                tracing::error!("Grading contract break, unrecognized result shape: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UNRECOGNIZED_RESULT_SHAPE",
                    "The grading service returned an unexpected result".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
