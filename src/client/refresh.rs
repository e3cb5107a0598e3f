//! Refresh coordination.
//!
//! Concurrent callers that need a new access token share one exchange with
//! the refresh endpoint. The coordinator is a two-state machine:
//! `Idle` → `Refreshing(handle)` → `Idle`. While refreshing, new callers
//! clone the in-flight handle instead of starting another exchange; the
//! handle is released when the exchange settles, success or failure.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jsonwebtoken::{DecodingKey, Validation};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{RefreshError, resolve_error_message};
use super::session::{SessionState, SessionUser, TokenUpdate};

/// Tokens handed to every waiter of a successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Body of a successful `/refresh-token` response. The refresh token is
/// present only when the server rotates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

/// Performs the actual exchange of a refresh token for new credentials
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// Posts to `{base_url}/refresh-token` without bearer credentials and
/// outside the gateway, so a 401 here never recurses into another refresh.
#[derive(Clone)]
pub struct HttpRefreshTransport {
    client: Client,
    base_url: String,
}

impl HttpRefreshTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshError> {
        let url = format!("{}/refresh-token", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RefreshBody { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if status != StatusCode::OK {
            return Err(RefreshError::Rejected {
                status,
                message: resolve_error_message(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| RefreshError::Decode(e.to_string()))
    }
}

type RefreshHandle = Shared<BoxFuture<'static, Result<TokenPair, RefreshError>>>;

enum RefreshState {
    Idle,
    Refreshing { attempt: u64, handle: RefreshHandle },
}

struct Slot {
    state: RefreshState,
    attempts: u64,
}

struct Inner {
    session: Arc<SessionState>,
    transport: Arc<dyn RefreshTransport>,
    slot: Mutex<Slot>,
}

/// Deduplicates concurrent refreshes. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(session: Arc<SessionState>, transport: Arc<dyn RefreshTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                transport,
                slot: Mutex::new(Slot {
                    state: RefreshState::Idle,
                    attempts: 0,
                }),
            }),
        }
    }

    /// Obtain fresh tokens, joining the in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<TokenPair, RefreshError> {
        // Inspect and claim the slot without an await in between.
        let handle = {
            let mut slot = self.inner.slot.lock();
            match &slot.state {
                RefreshState::Refreshing { attempt, handle } => {
                    debug!(attempt, "Joining in-flight refresh");
                    handle.clone()
                }
                RefreshState::Idle => {
                    slot.attempts += 1;
                    let attempt = slot.attempts;
                    let handle = run_refresh(self.inner.clone(), attempt).boxed().shared();
                    slot.state = RefreshState::Refreshing {
                        attempt,
                        handle: handle.clone(),
                    };
                    debug!(attempt, "Starting refresh");
                    handle
                }
            }
        };

        handle.await
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.slot.lock().state, RefreshState::Refreshing { .. })
    }

    /// Number of refresh exchanges started so far
    pub fn attempts(&self) -> u64 {
        self.inner.slot.lock().attempts
    }
}

async fn run_refresh(inner: Arc<Inner>, attempt: u64) -> Result<TokenPair, RefreshError> {
    let outcome = exchange(&inner).await;

    match &outcome {
        Ok(_) => info!(attempt, "Access token refreshed"),
        Err(e) if e.ends_session() => {
            warn!(attempt, "Refresh failed, clearing session: {}", e);
            inner.session.clear();
        }
        Err(e) => warn!(attempt, "Refresh failed, keeping refresh token: {}", e),
    }

    let mut slot = inner.slot.lock();
    if matches!(slot.state, RefreshState::Refreshing { attempt: current, .. } if current == attempt)
    {
        slot.state = RefreshState::Idle;
    }
    drop(slot);

    outcome
}

async fn exchange(inner: &Inner) -> Result<TokenPair, RefreshError> {
    let refresh_token = inner
        .session
        .refresh_token()
        .ok_or(RefreshError::MissingRefreshToken)?;

    let grant = inner.transport.exchange(&refresh_token).await?;

    let mut update = TokenUpdate::access(grant.access_token.clone());
    if let Some(rotated) = &grant.refresh_token {
        update = update.refresh_token(Some(rotated.clone()));
    }
    // A restarted client holds only the refresh token; a grant without a
    // user then takes the identity from the new access token.
    let user = grant.user.or_else(|| match inner.session.snapshot().user {
        Some(_) => None,
        None => username_from_access_token(&grant.access_token).map(SessionUser::new),
    });
    if let Some(user) = user {
        update = update.user(Some(user));
    }
    inner.session.set_tokens(update)?;

    Ok(TokenPair {
        access_token: grant.access_token,
        refresh_token: grant.refresh_token.unwrap_or(refresh_token),
    })
}

#[derive(Deserialize)]
struct IdentityClaims {
    username: String,
}

/// Reads the `username` claim without checking the signature. The client
/// never holds the signing secret; the server verifies every use of the token.
fn username_from_access_token(token: &str) -> Option<String> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    match jsonwebtoken::decode::<IdentityClaims>(token, &DecodingKey::from_secret(&[]), &validation)
    {
        Ok(data) => Some(data.claims.username),
        Err(e) => {
            debug!("Access token carries no readable username: {}", e);
            None
        }
    }
}
