//! Configuration module for environment variables and application settings

use std::env;
use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use chrono::Duration;

/// Default access token lifetime (15 minutes)
const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// Default refresh token lifetime (7 days)
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Application name used for the client state directory
const APP_NAME: &str = "todo-auth";

#[derive(Debug, Clone)]
pub struct Config {
    /// Token signing configuration
    pub auth: AuthConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Optional Postgres configuration; the in-memory user store is used when absent
    pub database: Option<DatabaseSettings>,
}

#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Return a new refresh token from `/refresh-token`
    pub rotate_refresh_tokens: bool,
}

// Secrets stay out of Debug output.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: usize,
}

/// Settings consumed by the client session core
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the authentication service, e.g. `http://localhost:3001/api`
    pub base_url: String,
    /// Directory holding the durable store (refresh token)
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database = env::var("DATABASE_URL").ok().map(|url| DatabaseSettings {
            url,
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 16),
        });

        Ok(Self {
            auth: AuthConfig::from_env()?,
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("PORT", 3001),
                cors_origins: env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string())
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },
            database,
        })
    }
}

impl AuthConfig {
    /// Load signing secrets and lifetimes from the environment
    pub fn from_env() -> Result<Self> {
        let config = Self {
            access_secret: env::var("ACCESS_TOKEN_SECRET")
                .map_err(|_| anyhow!("ACCESS_TOKEN_SECRET environment variable is required"))?,
            refresh_secret: env::var("REFRESH_TOKEN_SECRET")
                .map_err(|_| anyhow!("REFRESH_TOKEN_SECRET environment variable is required"))?,
            access_ttl: Duration::seconds(parse_or("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)),
            refresh_ttl: Duration::seconds(parse_or(
                "REFRESH_TOKEN_TTL_SECS",
                DEFAULT_REFRESH_TTL_SECS,
            )),
            rotate_refresh_tokens: parse_or("ROTATE_REFRESH_TOKENS", false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a config with default lifetimes
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            rotate_refresh_tokens: false,
        }
    }

    /// Reject empty secrets and a shared access/refresh secret
    pub fn validate(&self) -> Result<()> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            bail!("token signing secrets must not be empty");
        }
        if self.access_secret == self.refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Load client settings from the environment
    pub fn from_env() -> Result<Self> {
        let state_dir = match env::var("TODO_STATE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::cache_dir()
                .ok_or_else(|| anyhow!("Could not find cache directory"))?
                .join(APP_NAME),
        };

        Ok(Self {
            base_url: env::var("TODO_API_URL")
                .unwrap_or_else(|_| "http://localhost:3001/api".to_string()),
            state_dir,
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, "Ignoring unparsable value, using default");
            default
        }),
        Err(_) => default,
    }
}
