//! Client session state.
//!
//! Holds the current access token, refresh token and user, writes every
//! change through to the stores, and notifies subscribers synchronously.
//! The access token and user go to the session-scoped store; the refresh
//! token goes to the durable store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{SessionError, StorageError};
use super::storage::KeyValueStore;

const ACCESS_TOKEN_KEY: &str = "todo/accessToken";
const REFRESH_TOKEN_KEY: &str = "todo/refreshToken";
const USER_KEY: &str = "todo/user";

/// Identity snapshot kept alongside the tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
}

impl SessionUser {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// Invariant: `access_token.is_some()` implies `user.is_some()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<SessionUser>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Argument to [`SessionState::set_tokens`].
///
/// The access token always overwrites. The refresh token and user are
/// tri-state: the outer `None` keeps the previous value, `Some(None)`
/// clears it and `Some(Some(v))` replaces it.
#[derive(Debug, Clone, Default)]
pub struct TokenUpdate {
    access_token: Option<String>,
    refresh_token: Option<Option<String>>,
    user: Option<Option<SessionUser>>,
}

impl TokenUpdate {
    pub fn access(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Self::default()
        }
    }

    pub fn refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    pub fn user(mut self, user: Option<SessionUser>) -> Self {
        self.user = Some(user);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&Session) + Send + Sync>;

pub struct SessionState {
    session: Mutex<Session>,
    session_store: Arc<dyn KeyValueStore>,
    durable_store: Arc<dyn KeyValueStore>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl SessionState {
    /// Empty session over the given stores
    pub fn new(
        session_store: Arc<dyn KeyValueStore>,
        durable_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            session_store,
            durable_store,
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Construct and immediately hydrate from the stores
    pub fn hydrated(
        session_store: Arc<dyn KeyValueStore>,
        durable_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let state = Self::new(session_store, durable_store);
        state.hydrate();
        state
    }

    /// Current session value
    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.lock().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.lock().refresh_token.clone()
    }

    /// Load the persisted session. Never fails: unreadable or corrupt
    /// entries are erased and treated as absent.
    pub fn hydrate(&self) -> Session {
        let mut access_token = read_entry(self.session_store.as_ref(), ACCESS_TOKEN_KEY);
        let refresh_token = read_entry(self.durable_store.as_ref(), REFRESH_TOKEN_KEY);
        let user = read_entry(self.session_store.as_ref(), USER_KEY).and_then(|raw| {
            match serde_json::from_str::<SessionUser>(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!("Discarding unreadable persisted user: {}", e);
                    remove_entry(self.session_store.as_ref(), USER_KEY);
                    None
                }
            }
        });

        if access_token.is_some() && user.is_none() {
            warn!("Discarding persisted access token without a user");
            remove_entry(self.session_store.as_ref(), ACCESS_TOKEN_KEY);
            access_token = None;
        }

        let session = Session {
            access_token,
            refresh_token,
            user,
        };
        debug!(
            authenticated = session.is_authenticated(),
            has_refresh_token = session.refresh_token.is_some(),
            "Hydrated session"
        );
        *self.session.lock() = session.clone();
        session
    }

    /// Apply `update`, persist it, then notify subscribers before returning.
    pub fn set_tokens(&self, update: TokenUpdate) -> Result<Session, SessionError> {
        let next = {
            let mut current = self.session.lock();
            let next = Session {
                access_token: update.access_token,
                refresh_token: match update.refresh_token {
                    Some(value) => value,
                    None => current.refresh_token.clone(),
                },
                user: match update.user {
                    Some(value) => value,
                    None => current.user.clone(),
                },
            };
            if next.access_token.is_some() && next.user.is_none() {
                return Err(SessionError::AccessTokenWithoutUser);
            }

            self.persist(&next);
            *current = next.clone();
            next
        };

        self.notify(&next);
        Ok(next)
    }

    /// Reset to an empty session and erase persisted entries
    pub fn clear(&self) {
        {
            let mut current = self.session.lock();
            *current = Session::default();
            remove_entry(self.session_store.as_ref(), ACCESS_TOKEN_KEY);
            remove_entry(self.session_store.as_ref(), USER_KEY);
            remove_entry(self.durable_store.as_ref(), REFRESH_TOKEN_KEY);
        }
        debug!("Session cleared");
        self.notify(&Session::default());
    }

    /// Register a listener called synchronously after every change
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn persist(&self, session: &Session) {
        write_entry(
            self.session_store.as_ref(),
            ACCESS_TOKEN_KEY,
            session.access_token.as_deref(),
        );
        write_entry(
            self.durable_store.as_ref(),
            REFRESH_TOKEN_KEY,
            session.refresh_token.as_deref(),
        );
        let user = session
            .user
            .as_ref()
            .and_then(|user| serde_json::to_string(user).ok());
        write_entry(self.session_store.as_ref(), USER_KEY, user.as_deref());
    }

    fn notify(&self, session: &Session) {
        // Listeners run outside the lock so they may read or subscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(session);
        }
    }
}

fn read_entry(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, "Unable to read session entry: {}", e);
            remove_entry(store, key);
            None
        }
    }
}

// Storage failures degrade to memory-only; the in-memory session stays authoritative.
fn write_entry(store: &dyn KeyValueStore, key: &str, value: Option<&str>) {
    let result: Result<(), StorageError> = match value {
        Some(value) => store.set(key, value),
        None => store.remove(key),
    };
    if let Err(e) = result {
        warn!(key, "Unable to persist session entry: {}", e);
    }
}

fn remove_entry(store: &dyn KeyValueStore, key: &str) {
    if let Err(e) = store.remove(key) {
        warn!(key, "Unable to erase session entry: {}", e);
    }
}
