//! Credential store: registration and password verification over a
//! `UserRepository`.

use std::sync::Arc;

use crate::auth::error::AuthError;
use crate::auth::password;
use crate::database::{User, UserRepository};

#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    /// Create a user. The plaintext password is hashed before storage and
    /// dropped afterwards.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if self.users.find_by_username(username).await?.is_some() {
            return Err(AuthError::DuplicateUsername);
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
            .await
            .map_err(|e| AuthError::Storage(format!("hashing task failed: {e}")))?
            .map_err(|e| AuthError::Storage(format!("failed to hash password: {e}")))?;

        let user = User::new(username.to_string(), password_hash);
        // The repository re-checks uniqueness atomically for concurrent registrations.
        self.users.insert(user.clone()).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Unknown usernames and wrong passwords fail identically.
    pub async fn verify(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let user = self.users.find_by_username(username).await?;

        let password = password.to_string();
        let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => password::verify_password(&password, &hash),
            None => {
                password::verify_against_dummy(&password);
                false
            }
        })
        .await
        .map_err(|e| AuthError::Storage(format!("verification task failed: {e}")))?;

        match user {
            Some(user) if matches => Ok(user),
            _ => {
                tracing::info!("Rejected login attempt");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryUserStore;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryUserStore::new()))
    }

    #[tokio::test]
    async fn register_then_verify() {
        let store = store();
        let user = store.register("alice", "secret123").await.unwrap();

        let verified = store.verify("alice", "secret123").await.unwrap();
        assert_eq!(verified.id, user.id);
        assert_ne!(verified.password_hash, "secret123");
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let store = store();
        store.register("alice", "secret123").await.unwrap();

        let err = store.register("alice", "different").await.unwrap_err();
        assert!(matches!(err, AuthError::DuplicateUsername));
    }

    #[tokio::test]
    async fn verify_requires_the_registered_password() {
        let store = store();
        store.register("alice", "secret123").await.unwrap();

        assert!(store.verify("alice", "wrong").await.is_err());
        assert!(store.verify("Alice", "secret123").await.is_err());
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let store = store();
        store.register("alice", "secret123").await.unwrap();

        let unknown = store.verify("mallory", "secret123").await.unwrap_err();
        let wrong = store.verify("alice", "nope").await.unwrap_err();

        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.status(), wrong.status());
    }
}
