use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised by the session stores
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("an access token requires a user identity")]
    AccessTokenWithoutUser,
}

/// Outcome of a failed refresh, shared by every waiter of one attempt
#[derive(Error, Debug, Clone)]
pub enum RefreshError {
    #[error("Missing refresh token")]
    MissingRefreshToken,

    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Network error during refresh: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    Decode(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RefreshError {
    /// Only a missing token or an explicit rejection of it ends the session.
    /// Network trouble, server faults and unusable 200s keep the refresh
    /// token for the next attempt.
    pub fn ends_session(&self) -> bool {
        match self {
            RefreshError::MissingRefreshToken => true,
            RefreshError::Rejected { status, .. } => {
                *status == StatusCode::BAD_REQUEST || *status == StatusCode::UNAUTHORIZED
            }
            RefreshError::Network(_) | RefreshError::Decode(_) | RefreshError::Session(_) => {
                false
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// Explicit 401 that survived the refresh-and-retry path
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    DuplicateUsername(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    /// Transport failure; never triggers a refresh or a session clear
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    error: Option<String>,
    code: Option<String>,
}

/// Human-readable message for a failed response: the body's `message`,
/// then its `error`, then the raw body, then the status reason.
pub fn resolve_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message;
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('{') {
        return truncate_body(trimmed);
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| "Unexpected error".to_string())
}

fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.code)
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl ClientError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = resolve_error_message(status, body);
        match error_code(body).as_deref() {
            Some("invalid_credentials") => return ClientError::InvalidCredentials(message),
            Some("duplicate_username") => return ClientError::DuplicateUsername(message),
            _ => {}
        }
        if status == StatusCode::UNAUTHORIZED {
            ClientError::Unauthorized(message)
        } else {
            ClientError::Rejected { status, message }
        }
    }

    /// Whether the caller should send the user back to sign-in. A failed
    /// refresh reaches the caller as the original `Unauthorized`, so this is
    /// the single "session expired" signal.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }
}
