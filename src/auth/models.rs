//! Authentication Models
//!
//! Wire payloads for the auth endpoints and the authenticated user injected
//! by the bearer middleware.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::error::AuthError;

/// Authenticated user information extracted from JWT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

/// Register and login request payload
#[derive(Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl CredentialsRequest {
    /// Both fields must be present and non-blank.
    pub fn validate(self) -> Result<(String, String), AuthError> {
        let username = self.username.unwrap_or_default();
        let password = self.password.unwrap_or_default();
        if username.trim().is_empty() || password.trim().is_empty() {
            return Err(AuthError::InvalidRequest(
                "Username and password are required".to_string(),
            ));
        }
        Ok((username, password))
    }
}

/// Token pair returned by register and login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when refresh-token rotation is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}
