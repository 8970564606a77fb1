use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    /// A UNIQUE or CHECK constraint rejected a write. `field` names the
    /// offending column (`stripe_payment_intent_id`) or CHECK expression.
    #[error("Constraint violation on {field}")]
    ConstraintViolation { field: String },

    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when this is a constraint violation on the given column.
    pub fn is_constraint_on(&self, column: &str) -> bool {
        matches!(self, AppError::ConstraintViolation { field } if field == column)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                AppError::ConstraintViolation {
                    field: msg
                        .as_deref()
                        .map(constraint_field)
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            }
            _ => AppError::Database(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Extract the column from SQLite's constraint message.
///
/// `"UNIQUE constraint failed: orders.stripe_payment_intent_id"` yields
/// `stripe_payment_intent_id`; CHECK failures yield the expression text.
fn constraint_field(message: &str) -> String {
    let detail = message
        .split_once("failed: ")
        .map(|(_, rest)| rest)
        .unwrap_or(message);
    let first = detail.split(',').next().unwrap_or(detail).trim();
    match first.split_once('.') {
        Some((_table, column)) if !column.contains(' ') => column.to_string(),
        _ => first.to_string(),
    }
}

/// JSON error body shared by every endpoint.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::ConstraintViolation { field } => {
                tracing::error!("Unhandled constraint violation on {}", field);
                (StatusCode::CONFLICT, "Conflict", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        ErrorResponse {
            error: error.to_string(),
            code: None,
            details,
        }
        .into_response_with(status)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
