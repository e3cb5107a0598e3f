//! Client half of the auth core.
//!
//! - `SessionState`: current tokens and user, persisted and observable
//! - `RefreshCoordinator`: one in-flight refresh shared by all callers
//! - `ApiClient`: bearer attachment plus refresh-and-retry-once on 401
//! - `AuthApi`: register, login, logout and the `/me` call

pub mod api;
pub mod error;
pub mod gateway;
pub mod refresh;
pub mod session;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::ClientConfig;

pub use api::{AuthApi, Credentials, CurrentUser};
pub use error::{ClientError, RefreshError, SessionError, StorageError};
pub use gateway::{ApiClient, ApiRequest, ApiResponse};
pub use refresh::{RefreshCoordinator, RefreshTransport, TokenPair};
pub use session::{Session, SessionState, SessionUser, SubscriptionId, TokenUpdate};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Hydrated session over a process-scoped store and the durable file store,
/// wired to an `AuthApi` for `config.base_url`.
pub fn connect(config: &ClientConfig) -> Result<AuthApi> {
    let session = Arc::new(SessionState::hydrated(
        Arc::new(MemoryStore::new()),
        Arc::new(FileStore::in_dir(&config.state_dir)),
    ));
    let client = ApiClient::new(config.base_url.clone(), session)?;
    Ok(AuthApi::new(client))
}
