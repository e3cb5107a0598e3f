//! Typed calls to the auth service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ClientError;
use super::gateway::{ApiClient, ApiRequest};
use super::session::{Session, SessionUser, TokenUpdate};

/// Plaintext credentials; never persisted or logged
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthTokensResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<SessionUser>,
}

/// Identity returned by `/me`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
}

#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn register(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        self.authenticate("/register", credentials).await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        self.authenticate("/login", credentials).await
    }

    pub fn logout(&self) {
        self.client.session().clear();
        tracing::info!("Logged out");
    }

    /// Authenticated call; refreshes transparently on an expired access token
    pub async fn me(&self) -> Result<CurrentUser, ClientError> {
        self.client.get_json("/me").await
    }

    // Exempt: a 401 from login means bad credentials, not an expired token.
    async fn authenticate(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> Result<Session, ClientError> {
        let request = ApiRequest::post(path).json(credentials)?.exempt();
        let tokens: AuthTokensResponse = self.client.send(request).await?.json()?;

        let user = tokens
            .user
            .unwrap_or_else(|| SessionUser::new(credentials.username.clone()));
        let session = self.client.session().set_tokens(
            TokenUpdate::access(tokens.access_token)
                .refresh_token(tokens.refresh_token)
                .user(Some(user)),
        )?;

        tracing::info!(username = %credentials.username, "Authenticated");
        Ok(session)
    }
}
