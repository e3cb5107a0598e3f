//! Auth routes for registration, login, token refresh and user info

use axum::{
    Extension, Json, Router,
    extract::{FromRequest, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use uuid::Uuid;

use crate::auth::middleware::AuthMiddleware;
use crate::auth::models::{
    AuthUser, CredentialsRequest, RefreshRequest, RefreshResponse, TokenPairResponse,
};
use crate::auth::{AuthError, TokenError};
use crate::server::AppState;

/// `Json` whose rejections render as an `AuthError`
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AuthError))]
pub struct JsonBody<T>(pub T);

pub async fn register(
    State(app_state): State<AppState>,
    JsonBody(payload): JsonBody<CredentialsRequest>,
) -> Result<(StatusCode, Json<TokenPairResponse>), AuthError> {
    let (username, password) = payload.validate()?;

    let user = app_state.credentials.register(&username, &password).await?;
    let tokens = issue_pair(&app_state, user.id, &user.username)?;

    Ok((StatusCode::CREATED, Json(tokens)))
}

pub async fn login(
    State(app_state): State<AppState>,
    JsonBody(payload): JsonBody<CredentialsRequest>,
) -> Result<Json<TokenPairResponse>, AuthError> {
    let (username, password) = payload.validate()?;

    let user = app_state.credentials.verify(&username, &password).await?;
    let tokens = issue_pair(&app_state, user.id, &user.username)?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(tokens))
}

pub async fn refresh_token(
    State(app_state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let refresh_token = payload
        .refresh_token
        .filter(|token| !token.trim().is_empty())
        .ok_or(AuthError::MissingRefreshToken)?;

    let identity = app_state
        .tokens
        .verify_refresh_token(&refresh_token)
        .map_err(|e| {
            tracing::debug!("Refresh token rejected: {}", e);
            AuthError::InvalidToken
        })?;

    let access_token = app_state
        .tokens
        .issue_access_token(identity.user_id, &identity.username)
        .map_err(signing_error)?;

    let refresh_token = if app_state.rotate_refresh_tokens {
        Some(
            app_state
                .tokens
                .issue_refresh_token(identity.user_id, &identity.username)
                .map_err(signing_error)?,
        )
    } else {
        None
    };

    tracing::debug!(user_id = %identity.user_id, rotated = refresh_token.is_some(), "Refreshed access token");
    Ok(Json(RefreshResponse {
        access_token,
        refresh_token,
        user: AuthUser {
            id: identity.user_id,
            username: identity.username,
        },
    }))
}

/// Returns the identity of the access-token bearer
pub async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
    Json(user)
}

fn issue_pair(
    app_state: &AppState,
    user_id: Uuid,
    username: &str,
) -> Result<TokenPairResponse, AuthError> {
    let access_token = app_state
        .tokens
        .issue_access_token(user_id, username)
        .map_err(signing_error)?;
    let refresh_token = app_state
        .tokens
        .issue_refresh_token(user_id, username)
        .map_err(signing_error)?;

    Ok(TokenPairResponse {
        access_token,
        refresh_token,
        user: AuthUser {
            id: user_id,
            username: username.to_string(),
        },
    })
}

fn signing_error(err: TokenError) -> AuthError {
    AuthError::Signing(err.to_string())
}

pub fn create_auth_routes(app_state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/api/me", get(me))
        .layer(middleware::from_fn_with_state(
            app_state.tokens.clone(),
            AuthMiddleware::validate_token,
        ));

    Router::new()
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/refresh-token", post(refresh_token))
        .merge(protected)
}
