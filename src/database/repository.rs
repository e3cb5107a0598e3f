//! Storage seam for user accounts.

use async_trait::async_trait;
use thiserror::Error;

use crate::database::models::User;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("username already exists")]
    Duplicate,

    #[error("user storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable user records keyed by a unique, case-sensitive username
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    /// Fails with `Duplicate` if the username is taken. The check and the
    /// write happen atomically.
    async fn insert(&self, user: User) -> Result<(), RepositoryError>;
}
