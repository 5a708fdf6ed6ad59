use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors surfaced by the HTTP handlers.
///
/// The message stays in the server log; clients only get the status code.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request: bad multipart body, missing `file` field, invalid
    /// object name, oversized form fields.
    #[error("bad request: {0}")]
    ClientInput(String),

    #[error("object not found")]
    NotFound,

    /// Stored ciphertext failed authentication or is structurally invalid.
    #[error("integrity failure: {0}")]
    Integrity(String),

    #[error("backend failure: {0}")]
    Backend(String),

    /// Key derivation or task failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ClientInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Integrity(_) | AppError::Backend(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::ClientInput(_) => tracing::warn!("{self}"),
            AppError::NotFound => tracing::debug!("{self}"),
            AppError::Integrity(_) | AppError::Backend(_) | AppError::Internal(_) => {
                tracing::error!("{self}")
            }
        }
        self.status().into_response()
    }
}
