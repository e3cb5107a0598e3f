//! # Server Module
//!
//! HTTP server setup and route configuration for the auth service.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method, header};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::{CredentialStore, TokenIssuer};
use crate::config::{AuthConfig, Config};
use crate::database::{
    DatabaseConfig, DatabaseConnection, MemoryUserStore, PostgresUserStore, UserRepository,
    migrations,
};
use crate::routes::health::ping;

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialStore,
    pub tokens: Arc<TokenIssuer>,
    pub rotate_refresh_tokens: bool,
}

impl AppState {
    pub fn new(users: Arc<dyn UserRepository>, auth: &AuthConfig) -> Self {
        Self {
            credentials: CredentialStore::new(users),
            tokens: Arc::new(TokenIssuer::new(auth)),
            rotate_refresh_tokens: auth.rotate_refresh_tokens,
        }
    }

    /// Postgres when `DATABASE_URL` is set, the in-memory store otherwise
    pub async fn from_config(config: &Config) -> Result<Self> {
        let users: Arc<dyn UserRepository> = match &config.database {
            Some(settings) => {
                let db_config = DatabaseConfig::from_settings(settings)?;
                let db = DatabaseConnection::new(db_config)
                    .await
                    .context("Failed to connect to DB")?;
                migrations::run_migrations(db.pool()).await?;
                Arc::new(PostgresUserStore::new(db))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; users are kept in memory only");
                Arc::new(MemoryUserStore::new())
            }
        };

        Ok(Self::new(users, &config.auth))
    }
}

/// Build the full application router
pub fn build_router(app_state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    Router::new()
        .route("/ping", get(ping))
        .merge(crate::routes::auth::create_auth_routes(&app_state))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([
                        header::ORIGIN,
                        header::CONTENT_TYPE,
                        header::ACCEPT,
                        header::AUTHORIZATION,
                    ]),
            ),
        )
        .with_state(app_state)
}

/// Starts the auth HTTP server and runs until the process is terminated.
pub async fn start(config: Config) -> Result<()> {
    let app_state = AppState::from_config(&config).await?;
    let app = build_router(app_state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr} - port may already be in use"))?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Health check available at http://{}/ping", addr);
    tracing::info!("Auth endpoints available at http://{}/api/*", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
