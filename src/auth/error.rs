//! Authentication errors and their HTTP rendering.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::RepositoryError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username is already taken")]
    DuplicateUsername,

    /// Same message whether the username exists or not.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Refresh token can't be empty")]
    MissingRefreshToken,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// JSON error body returned by every failing auth endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::DuplicateUsername => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::MissingRefreshToken => StatusCode::BAD_REQUEST,
            AuthError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Storage(_) | AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code clients branch on
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::DuplicateUsername => "duplicate_username",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InvalidToken => "invalid_token",
            AuthError::MissingRefreshToken => "missing_refresh_token",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::Storage(_) => "storage_error",
            AuthError::Signing(_) => "signing_error",
        }
    }
}

impl From<RepositoryError> for AuthError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Duplicate => AuthError::DuplicateUsername,
            RepositoryError::Unavailable(msg) => AuthError::Storage(msg),
        }
    }
}

// Malformed bodies, a missing content type and mistyped fields all answer
// with the same 400 shape as blank credentials.
impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(status = %rejection.status(), "Rejected request body: {}", rejection.body_text());
        AuthError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details are logged, not returned.
        let message = match &self {
            AuthError::Storage(detail) | AuthError::Signing(detail) => {
                tracing::error!(code = self.code(), "{}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
