//! Error types for the Certificate Verifier.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

/// A single rejected input field, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Failures of the certificate and university directories.
///
/// `NotFound` is an answer; every other variant means the directory could not
/// answer and must never be read as "does not exist".
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("record not found")]
    NotFound,

    #[error("directory transport failure: {0}")]
    Transport(String),

    #[error("directory lookup timed out")]
    Timeout,
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failures of the audit log store.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt log row: {0}")]
    CorruptRow(String),
}

/// Application-level errors returned by the engine and handlers.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Input validation failed")]
    Validation(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Audit store error: {0}")]
    AuditStore(#[from] AuditError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VerifyError {
    /// Shorthand for a validation failure on one field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }
}

impl IntoResponse for VerifyError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            VerifyError::Validation(details) => {
                let body = json!({
                    "error": "Input validation failed",
                    "code": "VALIDATION_ERROR",
                    "details": details,
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            VerifyError::NotFound(what) => {
                let body = json!({ "error": format!("{what} not found"), "code": "NOT_FOUND" });
                return (StatusCode::NOT_FOUND, Json(body)).into_response();
            }
            VerifyError::DirectoryUnavailable(cause) => {
                tracing::error!(%cause, "directory unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "DIRECTORY_UNAVAILABLE",
                    "Verification is temporarily unavailable, please retry",
                )
            }
            VerifyError::AuditStore(e) => {
                tracing::error!(error = %e, "audit store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "AUDIT_STORE_ERROR",
                    "Failed to query verification log",
                )
            }
            VerifyError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An unexpected error occurred",
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
