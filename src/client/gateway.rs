//! Authenticated request gateway.
//!
//! Every outbound call goes through [`ApiClient::send`]. The gateway attaches
//! the current access token, and on an explicit 401 asks the
//! [`RefreshCoordinator`] for new tokens and resubmits the request once.
//! The resubmission is a new [`ApiRequest`] value carrying the new
//! credential; the original request is never mutated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::ClientError;
use super::refresh::{HttpRefreshTransport, RefreshCoordinator, RefreshTransport};
use super::session::SessionState;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// An outbound request, described as a value
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<serde_json::Value>,
    exempt: bool,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            exempt: false,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body =
            Some(serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?);
        Ok(self)
    }

    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Skip bearer attachment and refresh handling
    pub fn exempt(mut self) -> Self {
        self.exempt = true;
        self
    }

    pub fn is_exempt(&self) -> bool {
        self.exempt
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }

    /// Copy of this request carrying `access_token`, marked as already retried
    pub fn retry_with(&self, access_token: &str) -> Result<Self, ClientError> {
        let mut retry = self.clone();
        retry.headers.insert(AUTHORIZATION, bearer_value(access_token)?);
        retry.retried = true;
        Ok(retry)
    }
}

/// Response status with its body already read
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_str(&self.body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    fn into_result(self) -> Result<Self, ClientError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClientError::from_status(self.status, &self.body))
        }
    }
}

/// API client for the auth service and any protected endpoint beside it.
/// Clone is cheap; clones share the connection pool, session and refresh slot.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionState>,
    refresher: RefreshCoordinator,
}

impl ApiClient {
    /// Client whose refreshes go to `{base_url}/refresh-token`
    pub fn new(base_url: impl Into<String>, session: Arc<SessionState>) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        let transport = Arc::new(HttpRefreshTransport::new(client.clone(), base_url.clone()));
        let refresher = RefreshCoordinator::new(session.clone(), transport);

        Ok(Self {
            client,
            base_url,
            session,
            refresher,
        })
    }

    /// Client with a caller-supplied refresh transport
    pub fn with_transport(
        base_url: impl Into<String>,
        session: Arc<SessionState>,
        transport: Arc<dyn RefreshTransport>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            refresher: RefreshCoordinator::new(session.clone(), transport),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    /// Send `request`, refreshing and retrying at most once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.dispatch(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return response.into_result();
        }

        let unauthorized = ClientError::from_status(response.status, &response.body);
        if request.is_exempt() || request.is_retry() {
            return Err(unauthorized);
        }

        debug!(method = %request.method, path = %request.path, "Unauthorized, refreshing");
        let tokens = match self.refresher.refresh().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Refresh failed, surfacing original 401: {}", e);
                return Err(unauthorized);
            }
        };

        // The retry already carries an Authorization header, so dispatch
        // leaves it alone; a second 401 is surfaced as-is.
        let retry = request.retry_with(&tokens.access_token)?;
        self.dispatch(&retry).await?.into_result()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));

        let mut headers = request.headers.clone();
        if !request.is_exempt() && !request.has_authorization() {
            if let Some(token) = self.session.access_token() {
                headers.insert(AUTHORIZATION, bearer_value(&token)?);
            }
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

fn bearer_value(token: &str) -> Result<HeaderValue, ClientError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ClientError::Decode(format!("token is not a valid header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::RefreshError;
    use crate::client::refresh::RefreshGrant;
    use crate::client::session::{SessionUser, TokenUpdate};
    use crate::client::storage::MemoryStore;
    use async_trait::async_trait;
    use axum::{Json, Router, extract::State, http::HeaderMap as AxumHeaders, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RefreshTransport for StubTransport {
        async fn exchange(&self, _refresh_token: &str) -> Result<RefreshGrant, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Long enough for every concurrent 401 to arrive while in flight.
            tokio::time::sleep(Duration::from_millis(200)).await;
            if self.fail {
                return Err(RefreshError::Rejected {
                    status: StatusCode::UNAUTHORIZED,
                    message: "Invalid refresh token".into(),
                });
            }
            Ok(RefreshGrant {
                access_token: "fresh".into(),
                refresh_token: None,
                user: None,
            })
        }
    }

    #[derive(Clone)]
    struct Stub {
        hits: Arc<AtomicUsize>,
        accept: &'static str,
    }

    /// 200 only for `Bearer {accept}`, 401 otherwise
    async fn protected(State(stub): State<Stub>, headers: AxumHeaders) -> axum::response::Response {
        use axum::response::IntoResponse;
        stub.hits.fetch_add(1, Ordering::SeqCst);
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if presented == format!("Bearer {}", stub.accept) {
            Json(serde_json::json!({ "token": presented })).into_response()
        } else {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid or expired token", "code": "invalid_token" })),
            )
                .into_response()
        }
    }

    async fn echo(headers: AxumHeaders) -> Json<serde_json::Value> {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Json(serde_json::json!({ "token": presented }))
    }

    async fn spawn_stub(accept: &'static str) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/protected", get(protected))
            .route("/echo", get(echo))
            .with_state(Stub {
                hits: hits.clone(),
                accept,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn session_with(access: &str) -> Arc<SessionState> {
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ));
        session
            .set_tokens(
                TokenUpdate::access(access)
                    .refresh_token(Some("refresh".into()))
                    .user(Some(SessionUser::new("alice"))),
            )
            .unwrap();
        session
    }

    fn client(base_url: &str, session: Arc<SessionState>, fail: bool) -> (ApiClient, Arc<StubTransport>) {
        let transport = Arc::new(StubTransport {
            calls: AtomicUsize::new(0),
            fail,
        });
        (
            ApiClient::with_transport(base_url, session, transport.clone()),
            transport,
        )
    }

    #[tokio::test]
    async fn attaches_current_access_token() {
        let (base, _) = spawn_stub("fresh").await;
        let (client, _) = client(&base, session_with("current"), false);

        let body: serde_json::Value = client.get_json("/echo").await.unwrap();
        assert_eq!(body["token"], "Bearer current");
    }

    #[tokio::test]
    async fn explicit_authorization_header_wins() {
        let (base, _) = spawn_stub("fresh").await;
        let (client, _) = client(&base, session_with("current"), false);

        let request = ApiRequest::get("/echo")
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer explicit"));
        let body: serde_json::Value = client.send(request).await.unwrap().json().unwrap();
        assert_eq!(body["token"], "Bearer explicit");
    }

    #[tokio::test]
    async fn no_session_means_no_credential() {
        let (base, _) = spawn_stub("fresh").await;
        let session = Arc::new(SessionState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        ));
        let (client, _) = client(&base, session, false);

        let body: serde_json::Value = client.get_json("/echo").await.unwrap();
        assert!(body["token"].is_null());
    }

    #[tokio::test]
    async fn unauthorized_request_is_refreshed_and_retried_once() {
        let (base, hits) = spawn_stub("fresh").await;
        let session = session_with("expired");
        let (client, transport) = client(&base, session.clone(), false);

        let body: serde_json::Value = client.get_json("/protected").await.unwrap();
        assert_eq!(body["token"], "Bearer fresh");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        let (base, hits) = spawn_stub("fresh").await;
        let (client, transport) = client(&base, session_with("expired"), false);

        let calls = (0..3).map(|_| client.get_json::<serde_json::Value>("/protected"));
        let results = futures::future::join_all(calls).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap()["token"], "Bearer fresh");
        }
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn second_unauthorized_is_not_retried() {
        // The stub accepts a token the refresh never yields.
        let (base, hits) = spawn_stub("never-issued").await;
        let (client, transport) = client(&base, session_with("expired"), false);

        let err = client.get_json::<serde_json::Value>("/protected").await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_original_unauthorized_and_clears_session() {
        let (base, hits) = spawn_stub("fresh").await;
        let session = session_with("expired");
        let (client, transport) = client(&base, session.clone(), true);

        let err = client.get_json::<serde_json::Value>("/protected").await.unwrap_err();
        match err {
            ClientError::Unauthorized(message) => assert_eq!(message, "Invalid or expired token"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn exempt_request_is_not_refreshed() {
        let (base, hits) = spawn_stub("fresh").await;
        let (client, transport) = client(&base, session_with("expired"), false);

        let err = client
            .send(ApiRequest::get("/protected").exempt())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn network_failure_does_not_refresh_or_clear() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = session_with("current");
        let (client, transport) = client(&format!("http://{addr}"), session.clone(), false);

        let err = client.get_json::<serde_json::Value>("/protected").await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.access_token().as_deref(), Some("current"));
    }

    #[test]
    fn retry_is_a_new_value() {
        let original = ApiRequest::get("/protected");
        let retry = original.retry_with("fresh").unwrap();

        assert!(!original.is_retry());
        assert!(!original.has_authorization());
        assert!(retry.is_retry());
        assert_eq!(
            retry.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer fresh"
        );
    }
}
