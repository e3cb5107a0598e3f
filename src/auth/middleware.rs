//! Authentication Middleware
//!
//! Axum middleware for bearer access-token validation.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::auth::{error::AuthError, jwt::TokenIssuer, models::AuthUser};

/// Authentication middleware that validates access tokens and injects user info
pub struct AuthMiddleware;

impl AuthMiddleware {
    /// Reject the request with 401 unless it carries a valid access token
    pub async fn validate_token(
        State(tokens): State<Arc<TokenIssuer>>,
        mut req: Request,
        next: Next,
    ) -> Result<Response, AuthError> {
        let token = bearer_token(&req).ok_or_else(|| {
            tracing::debug!("Missing bearer credential on {} {}", req.method(), req.uri());
            AuthError::InvalidToken
        })?;

        let identity = tokens.verify_access_token(token).map_err(|e| {
            tracing::debug!("Access token rejected: {}", e);
            AuthError::InvalidToken
        })?;

        let auth_user = AuthUser {
            id: identity.user_id,
            username: identity.username,
        };
        req.extensions_mut().insert(auth_user);

        Ok(next.run(req).await)
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
